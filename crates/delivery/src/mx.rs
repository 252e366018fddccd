/*
 * vSMTP mail transfer agent
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

use rand::seq::SliceRandom;
use trust_dns_resolver::TokioAsyncResolver;

/// Resolve the MX hosts for `domain`, sorted ascending by priority with
/// ties broken randomly so load is distributed instead of always hitting
/// the first record returned by the resolver. Falls back to a synthetic
/// `(10, domain)` record when no MX records exist and `fallback_to_a` is
/// set, relying on the A/AAAA lookup the connector performs itself.
pub async fn resolve_mx(
    resolver: &TokioAsyncResolver,
    domain: &str,
    fallback_to_a: bool,
) -> Vec<(u16, String)> {
    let mut records: Vec<(u16, String)> = match resolver.mx_lookup(domain).await {
        Ok(lookup) => lookup
            .iter()
            .map(|mx| {
                (
                    mx.preference(),
                    mx.exchange().to_string().trim_end_matches('.').to_owned(),
                )
            })
            .collect(),
        Err(e) => {
            tracing::debug!(%domain, error = %e, "MX lookup failed");
            Vec::new()
        }
    };

    if records.is_empty() && fallback_to_a {
        tracing::debug!(%domain, "no MX records, falling back to A/AAAA");
        records.push((10, domain.to_owned()));
    }

    order_by_priority(&mut records);
    records
}

/// Sort ascending by priority; records sharing a priority are shuffled
/// first so a stable sort leaves them in random relative order.
fn order_by_priority(records: &mut [(u16, String)]) {
    let mut rng = rand::thread_rng();
    records.shuffle(&mut rng);
    records.sort_by_key(|(priority, _)| *priority);
}

#[cfg(test)]
mod tests {
    use super::order_by_priority;

    #[test]
    fn orders_ascending_by_priority() {
        let mut records = vec![
            (20, "mx2.example.com".to_owned()),
            (10, "mx1.example.com".to_owned()),
            (30, "mx3.example.com".to_owned()),
        ];
        order_by_priority(&mut records);
        assert_eq!(
            records.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
    }

    #[test]
    fn keeps_all_records_with_equal_priority() {
        let mut records = vec![
            (10, "a.example.com".to_owned()),
            (10, "b.example.com".to_owned()),
            (10, "c.example.com".to_owned()),
        ];
        order_by_priority(&mut records);
        let mut hosts: Vec<_> = records.into_iter().map(|(_, host)| host).collect();
        hosts.sort();
        assert_eq!(hosts, vec!["a.example.com", "b.example.com", "c.example.com"]);
    }
}
