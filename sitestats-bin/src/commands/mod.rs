pub(crate) mod fetch;

pub(crate) use fetch::fetch;

use sitestats_lib::Fetcher;

use crate::api::SimilarwebApi;
use crate::options::Config;

/// Parameters passed to every command
pub(crate) struct CommandParams {
    pub(crate) fetcher: Fetcher,
    pub(crate) api: SimilarwebApi,
    pub(crate) domains: Vec<String>,
    pub(crate) cfg: Config,
}
