//! MapReduce applications the workers know how to run.
//!
//! A workload is selected by name on the command line of the worker
//! binaries; [`with_workload!`] turns the selection into a concrete
//! [`common::Workload`] value so task code stays generic.

pub mod ad_revenue;
pub mod vertex_degree;
pub mod word_count;

pub use ad_revenue::AdRevenue;
pub use vertex_degree::VertexDegree;
pub use word_count::WordCount;

/// Names accepted by [`try_named`].
pub const NAMES: &[&str] = &["ad-revenue", "word-count", "vertex-degree"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Named {
    AdRevenue,
    WordCount,
    VertexDegree,
}

impl Named {
    pub fn name(self) -> &'static str {
        match self {
            Named::AdRevenue => "ad-revenue",
            Named::WordCount => "word-count",
            Named::VertexDegree => "vertex-degree",
        }
    }
}

impl std::fmt::Display for Named {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub fn try_named(name: &str) -> Option<Named> {
    match name {
        "ad-revenue" => Some(Named::AdRevenue),
        "word-count" | "wc" => Some(Named::WordCount),
        "vertex-degree" => Some(Named::VertexDegree),
        _ => None,
    }
}

/// Evaluate `$body` with `$w` bound to the workload `$named` selects.
#[macro_export]
macro_rules! with_workload {
    ($named:expr, $w:ident => $body:expr) => {
        match $named {
            $crate::Named::AdRevenue => {
                let $w = $crate::AdRevenue;
                $body
            }
            $crate::Named::WordCount => {
                let $w = $crate::WordCount;
                $body
            }
            $crate::Named::VertexDegree => {
                let $w = $crate::VertexDegree;
                $body
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use common::Workload;

    use super::*;

    #[test]
    fn every_listed_name_resolves() {
        for name in NAMES {
            let named = try_named(name).unwrap();
            assert_eq!(named.name(), *name);
            let reported = with_workload!(named, w => w.name());
            assert_eq!(reported, *name);
        }
        assert_eq!(try_named("grep"), None);
    }
}
