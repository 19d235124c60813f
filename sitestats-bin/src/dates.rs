use anyhow::{Result, bail};

/// Earliest month the API serves traffic data for
const FIRST_AVAILABLE_MONTH: &str = "2018-01";

/// All months between `start` and `end`, inclusive, as `YYYY-MM`
/// strings in ascending order. The bounds may be given in either
/// order; a day component is ignored.
pub(crate) fn months_between(start: &str, end: &str) -> Result<Vec<String>> {
    let mut start = year_month(start)?;
    let mut end = year_month(end)?;
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }

    let (mut year, mut month) = start;
    let mut months = Vec::new();
    while (year, month) < end {
        months.push(format!("{year:04}-{month:02}"));
        if month < 12 {
            month += 1;
        } else {
            month = 1;
            year += 1;
        }
    }
    months.push(format!("{year:04}-{month:02}"));

    Ok(months)
}

/// The last `count` months up to and including `month`, bounded below
/// by the first month the API has data for
pub(crate) fn months_before(month: &str, count: usize) -> Result<Vec<String>> {
    let months = months_between(FIRST_AVAILABLE_MONTH, month)?;
    let skip = months.len().saturating_sub(count);
    Ok(months.into_iter().skip(skip).collect())
}

/// Parse the year and month out of a `YYYY-MM` or `YYYY-MM-DD` string
fn year_month(date: &str) -> Result<(u32, u32)> {
    let mut parts = date.splitn(3, '-');
    let (Some(year), Some(month)) = (parts.next(), parts.next()) else {
        bail!("Invalid date `{date}`; expected YYYY-MM");
    };
    let (Ok(year), Ok(month)) = (year.parse::<u32>(), month.parse::<u32>()) else {
        bail!("Invalid date `{date}`; expected YYYY-MM");
    };
    if !(1..=12).contains(&month) {
        bail!("Invalid month in `{date}`");
    }
    Ok((year, month))
}
