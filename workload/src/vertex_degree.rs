//! A MapReduce-compatible application that computes the
//! degree of each vertex in a graph, given a list of edges.
//!

use common::{ParseError, Workload};

#[derive(Debug, Clone, Copy, Default)]
pub struct VertexDegree;

fn parse_line(line: &str) -> Result<(u64, u64), ParseError> {
    let mut iter = line.split_whitespace().take(2);
    let mut vertex = || -> Result<u64, ParseError> {
        iter.next()
            .ok_or_else(|| ParseError::new(line, "expected two vertices"))?
            .parse()
            .map_err(|e| ParseError::new(line, e))
    };
    let a = vertex()?;
    let b = vertex()?;
    Ok((a, b))
}

impl Workload for VertexDegree {
    type Value = u64;

    fn name(&self) -> &'static str {
        "vertex-degree"
    }

    fn map_record(&self, record: &str) -> Result<Vec<(String, u64)>, ParseError> {
        let (a, b) = parse_line(record)?;
        Ok(vec![(a.to_string(), 1), (b.to_string(), 1)])
    }

    fn fold(&self, _key: &str, value: u64, acc: Option<u64>) -> u64 {
        acc.unwrap_or_default() + value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_edge_counts_for_both_endpoints() {
        let pairs = VertexDegree.map_record("3 7").unwrap();
        assert_eq!(pairs, vec![("3".to_string(), 1), ("7".to_string(), 1)]);
    }

    #[test]
    fn self_loops_count_twice() {
        let mut acc = None;
        for (key, value) in VertexDegree.map_record("5 5").unwrap() {
            acc = Some(VertexDegree.fold(&key, value, acc));
        }
        assert_eq!(acc, Some(2));
    }

    #[test]
    fn rejects_lines_without_two_vertices() {
        assert!(VertexDegree.map_record("42").is_err());
        assert!(VertexDegree.map_record("a b").is_err());
    }
}
