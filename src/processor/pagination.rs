//! Page sizing per log and partitioning of unread ranges into pages.

use anyhow::{bail, Context, Result};

/// Page size used for logs that match no pattern.
pub const DEFAULT_PAGE_SIZE: u64 = 32;

/// Batch sizes known to be accepted by common log operators, matched as
/// substrings of the log URL.
pub const DEFAULT_PAGE_SIZES: &[(&str, u64)] = &[
    ("googleapis", 32),
    ("cloudflare", 1024),
    ("digicert", 256),
    ("comodo", 1000),
    ("oak.ct.letsencrypt.org/2019/", 32),
    ("oak.ct.letsencrypt.org/2020/", 32),
    ("oak.ct.letsencrypt.org/2021/", 256),
    ("oak.ct.letsencrypt.org/2022/", 256),
    ("oak.ct.letsencrypt.org/2023/", 256),
    ("testflume.ct.letsencrypt.org/2020/", 256),
    ("testflume.ct.letsencrypt.org/2021/", 256),
    ("testflume.ct.letsencrypt.org/2022/", 256),
    ("testflume.ct.letsencrypt.org/2023/", 256),
    ("trustasia", 256),
];

/// Maps a log identifier to the number of entries requested per page.
///
/// Patterns are kept longest first so the most specific match wins no matter
/// how the table was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSizePolicy {
    rules: Vec<(String, u64)>,
    default_size: u64,
}

impl Default for PageSizePolicy {
    fn default() -> Self {
        Self::from_rules(
            DEFAULT_PAGE_SIZES
                .iter()
                .map(|(pattern, size)| ((*pattern).to_owned(), *size)),
            DEFAULT_PAGE_SIZE,
        )
    }
}

impl PageSizePolicy {
    pub fn new<I>(rules: I, default_size: u64) -> Result<Self>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let policy = Self::from_rules(rules, default_size);
        policy.validate()?;
        Ok(policy)
    }

    fn from_rules<I>(rules: I, default_size: u64) -> Self
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut rules = rules
            .into_iter()
            .map(|(pattern, size)| (pattern.trim().to_owned(), size))
            .collect::<Vec<_>>();
        rules.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        rules.dedup_by(|later, earlier| later.0 == earlier.0);
        Self {
            rules,
            default_size,
        }
    }

    /// Parses `pattern=size` pairs separated by commas and lays them over the
    /// defaults; a repeated pattern replaces the default entry.
    pub fn with_overrides(overrides: &str) -> Result<Self> {
        let mut rules = DEFAULT_PAGE_SIZES
            .iter()
            .map(|(pattern, size)| ((*pattern).to_owned(), *size))
            .collect::<Vec<_>>();

        for pair in overrides.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (pattern, size) = pair
                .split_once('=')
                .with_context(|| format!("page size override '{pair}' must be pattern=size"))?;
            let size = size
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid page size in '{pair}'"))?;
            let pattern = pattern.trim().to_owned();
            rules.retain(|(existing, _)| *existing != pattern);
            rules.push((pattern, size));
        }

        Self::new(rules, DEFAULT_PAGE_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_size == 0 {
            bail!("default page size must be greater than 0");
        }
        for (pattern, size) in &self.rules {
            if pattern.is_empty() {
                bail!("page size patterns cannot be empty");
            }
            if *size == 0 {
                bail!("page size for '{pattern}' must be greater than 0");
            }
        }
        Ok(())
    }

    pub fn page_size(&self, log_id: &str) -> u64 {
        self.rules
            .iter()
            .find(|(pattern, _)| log_id.contains(pattern.as_str()))
            .map(|(_, size)| *size)
            .unwrap_or(self.default_size)
    }

    pub fn rules(&self) -> &[(String, u64)] {
        &self.rules
    }

    pub fn default_size(&self) -> u64 {
        self.default_size
    }
}

/// Half-open range `[start, end)` of entry indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub start: u64,
    pub end: u64,
}

impl Page {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Splits `[cursor, tree_size)` into consecutive pages of at most
/// `page_size` entries. Yields nothing when the cursor is at or past the head.
pub fn pages(cursor: u64, tree_size: u64, page_size: u64) -> impl Iterator<Item = Page> {
    let step = page_size.max(1);
    let mut next = cursor;
    std::iter::from_fn(move || {
        if next >= tree_size {
            return None;
        }
        let start = next;
        let end = start.saturating_add(step).min(tree_size);
        next = end;
        Some(Page { start, end })
    })
}
