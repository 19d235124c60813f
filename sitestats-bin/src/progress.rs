use std::fmt;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar as Bar, ProgressStyle};
use sitestats_lib::ProgressSink;
use url::Url;

#[derive(Clone)]
struct ProgressConfig {
    template: &'static str,
    progress_chars: &'static str,
}

const CONFIG: ProgressConfig = ProgressConfig {
    template: "{pos}/{len:.238} {bar:.162/238} {wide_msg}",
    progress_chars: "━ ━",
};

static STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template(CONFIG.template)
        .expect("Valid progress bar")
        .progress_chars(CONFIG.progress_chars)
});

#[derive(Clone)]
/// Report progress to the CLI.
///
/// Doubles as the abort switch for a running bulk fetch: once
/// [`abort`](Self::abort) is called, the fetcher stops after the next
/// completed request.
pub(crate) struct Progress {
    bar: Option<Bar>,
    aborted: Arc<AtomicBool>,
}

impl Progress {
    pub(crate) fn new(hide_bar: bool, length: u64, initial_message: &'static str) -> Self {
        let bar = if hide_bar {
            None
        } else {
            let bar = Bar::new(length).with_style(STYLE.clone());
            bar.set_message(initial_message);
            Some(bar)
        };

        Progress {
            bar,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask the current bulk fetch to stop. Clones share the flag, so
    /// any of them can pull the brake.
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self, message: &'static str) {
        self.with_bar(|bar| bar.finish_with_message(message));
    }

    fn with_bar<F>(&self, action: F)
    where
        F: FnOnce(&Bar),
    {
        if let Some(bar) = &self.bar {
            action(bar);
        }
    }
}

impl ProgressSink for Progress {
    fn item_completed(&self, url: &Url) {
        self.with_bar(|bar| {
            bar.inc(1);
            // The query string stays out of the message; it carries
            // the API key
            bar.set_message(url.path().to_string());
        });
    }

    fn abort_requested(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("hidden", &self.bar.is_none())
            .field("aborted", &self.abort_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_still_tracks_the_abort_flag() {
        let progress = Progress::new(true, 10, "Loading data");
        assert!(!progress.abort_requested());

        progress.abort();
        assert!(progress.abort_requested());
    }

    #[test]
    fn test_clones_share_the_abort_flag() {
        let progress = Progress::new(true, 10, "Loading data");
        let clone = progress.clone();

        progress.abort();
        assert!(clone.abort_requested());
    }

    #[test]
    fn test_completions_are_counted_without_leaking_the_query() {
        let progress = Progress::new(false, 2, "Loading data");
        let url = Url::parse("https://api.example.com/v1/website/example.com/visits?api_key=secret")
            .unwrap();

        progress.item_completed(&url);

        let bar = progress.bar.as_ref().unwrap();
        assert_eq!(bar.position(), 1);
        assert!(!bar.message().contains("secret"));
    }
}
