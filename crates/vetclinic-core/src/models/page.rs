use serde::{Deserialize, Serialize};

/// One page of a list endpoint.
///
/// Collection endpoints answer either with a bare JSON array or with a
/// `{count, next, previous, results}` envelope; both decode into `Page`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    from = "PageWire<T>",
    bound(deserialize = "T: Deserialize<'de>", serialize = "T: Serialize")
)]
pub struct Page<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageWire<T> {
    Bare(Vec<T>),
    Paginated {
        #[serde(default)]
        count: Option<u64>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        previous: Option<String>,
        results: Vec<T>,
    },
}

impl<T> From<PageWire<T>> for Page<T> {
    fn from(wire: PageWire<T>) -> Self {
        match wire {
            PageWire::Bare(results) => Self {
                count: results.len() as u64,
                next: None,
                previous: None,
                results,
            },
            PageWire::Paginated {
                count,
                next,
                previous,
                results,
            } => Self {
                count: count.unwrap_or(results.len() as u64),
                next,
                previous,
                results,
            },
        }
    }
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
