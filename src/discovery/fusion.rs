// Merge candidate records from every evidence source into one per key
use std::collections::BTreeMap;

use super::results::{DetectedService, ServiceDetails, ServiceStatus};

/// Group by `(serviceName, port)` and fold each group into a single record.
///
/// Members of a group are put in a canonical order before folding, so the
/// outcome does not depend on which source reported first. Output is sorted
/// by type, name and port.
pub fn fuse(candidates: Vec<DetectedService>) -> Vec<DetectedService> {
    let mut groups: BTreeMap<(String, Option<u16>), Vec<DetectedService>> = BTreeMap::new();
    for candidate in candidates {
        groups.entry(candidate.key()).or_default().push(candidate);
    }

    let mut fused: Vec<DetectedService> = groups
        .into_values()
        .filter_map(|mut members| {
            members.sort_by_cached_key(canonical_form);
            let mut members = members.into_iter();
            let first = members.next()?;
            Some(members.fold(first, merge))
        })
        .collect();

    fused.sort_by(|a, b| {
        (a.service_type, &a.service_name, a.port).cmp(&(b.service_type, &b.service_name, b.port))
    });
    fused
}

fn canonical_form(service: &DetectedService) -> String {
    serde_json::to_string(service).unwrap_or_default()
}

fn take_some<T>(existing: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *existing = incoming;
    }
}

fn take_non_empty<T>(existing: &mut Vec<T>, incoming: Vec<T>) {
    if !incoming.is_empty() {
        *existing = incoming;
    }
}

/// Fold `incoming` into `existing`: non-empty incoming scalars win, domains
/// are unioned, details merge one member at a time.
pub fn merge(mut existing: DetectedService, incoming: DetectedService) -> DetectedService {
    existing.service_type = incoming.service_type;
    if incoming.status == ServiceStatus::Running {
        existing.status = ServiceStatus::Running;
    }
    take_some(&mut existing.protocol, incoming.protocol.filter(|p| !p.is_empty()));
    take_some(&mut existing.config_path, incoming.config_path.filter(|p| !p.is_empty()));
    take_some(&mut existing.config_hash, incoming.config_hash.filter(|h| !h.is_empty()));
    take_some(&mut existing.container_info, incoming.container_info);
    existing.add_domains(incoming.domains);
    existing.details = merge_details(existing.details, incoming.details);
    existing
}

fn merge_details(mut existing: ServiceDetails, incoming: ServiceDetails) -> ServiceDetails {
    take_non_empty(&mut existing.share_links, incoming.share_links);
    take_non_empty(&mut existing.ssl_certificates, incoming.ssl_certificates);
    take_non_empty(&mut existing.ports, incoming.ports);
    take_non_empty(&mut existing.protocols, incoming.protocols);
    take_some(&mut existing.version, incoming.version.filter(|v| !v.is_empty()));
    take_some(&mut existing.process, incoming.process.filter(|p| !p.is_empty()));
    existing.labels.extend(incoming.labels);
    existing
        .extra
        .extend(incoming.extra.into_iter().filter(|(_, value)| !value.is_null()));
    existing
}
