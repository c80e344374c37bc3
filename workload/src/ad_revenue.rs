//! Ad revenue per source-IP prefix over `uservisits`-style CSV records:
//!
//! ```text
//! sourceIP,destURL,visitDate,adRevenue,userAgent,countryCode,languageCode,searchWord,duration
//! ```
//!
//! Revenue is summed per the first eight characters of the source IP.

use common::{ParseError, Workload};

const PREFIX_LEN: usize = 8;
const REVENUE_FIELD: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct AdRevenue;

impl Workload for AdRevenue {
    type Value = f64;

    fn name(&self) -> &'static str {
        "ad-revenue"
    }

    fn map_record(&self, record: &str) -> Result<Vec<(String, f64)>, ParseError> {
        let fields: Vec<&str> = record.split(',').collect();
        if fields.len() <= REVENUE_FIELD {
            return Err(ParseError::new(record, "too few fields"));
        }

        let source_ip = fields[0].trim_matches('"');
        if source_ip.is_empty() {
            return Err(ParseError::new(record, "empty source ip"));
        }
        let revenue: f64 = fields[REVENUE_FIELD]
            .trim()
            .parse()
            .map_err(|e| ParseError::new(record, e))?;

        let prefix: String = source_ip.chars().take(PREFIX_LEN).collect();
        Ok(vec![(prefix, revenue)])
    }

    fn fold(&self, _key: &str, value: f64, acc: Option<f64>) -> f64 {
        acc.unwrap_or_default() + value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_on_the_source_ip_prefix() {
        let pairs = AdRevenue
            .map_record("158.112.27.3,nbizrgdziebsaecsecujfjcqtvnpcnxxwiopmddorcxnlijdizgoi,1991-06-10,0.115967035,Mozilla/5.0,ABW,en,nomad,2")
            .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "158.112.");
        assert!((pairs[0].1 - 0.115967035).abs() < 1e-12);
    }

    #[test]
    fn short_ips_are_kept_whole() {
        let pairs = AdRevenue.map_record("1.2.3.4,u,d,2.5").unwrap();
        assert_eq!(pairs[0].0, "1.2.3.4");
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert!(AdRevenue.map_record("1.2.3.4,u,d").is_err());
        assert!(AdRevenue.map_record("1.2.3.4,u,d,lots").is_err());
        assert!(AdRevenue.map_record(",u,d,1.0").is_err());
        assert!(AdRevenue.map_record("").is_err());
    }
}
