use crate::protocol::types::{DomainName, Message, ResourceRecord};

/// Drop out-of-bailiwick records from an upstream response.
///
/// A server is only trusted for names inside the zone we asked it
/// about: a referral from a `com.` server may not legitimately deliver
/// records for `evil.org.`.  Every section is filtered independently,
/// keeping only records whose owner name equals the active zone or
/// sits below it.  The dropped records are returned so the caller can
/// log them.
pub fn filter_response(active_zone: &DomainName, response: &mut Message) -> Vec<ResourceRecord> {
    let mut dropped = Vec::new();

    for section in [
        &mut response.answers,
        &mut response.authority,
        &mut response.additional,
    ] {
        let mut kept = Vec::with_capacity(section.len());
        for rr in section.drain(..) {
            if rr.name.is_subdomain_of(active_zone) {
                kept.push(rr);
            } else {
                dropped.push(rr);
            }
        }
        *section = kept;
    }

    dropped
}
