use std::collections::HashSet;

use crate::protocol::types::*;

/// Build a reply to `request` by drawing records from `pool`.
///
/// Answers are the pool records matching the question name and type.
/// In authoritative mode a CNAME at the question name is also an
/// answer, and the chain is followed through the pool (with a cycle
/// guard), collecting records of the question type at each step - this
/// is what folds a CNAME chase into a single answer section.
///
/// Authority is the NS records at the closest enclosing delegation:
/// walk the question name's suffixes from the name itself towards the
/// root, and take every NS record at the first suffix that has any.
/// NS questions get no authority section, and the root never
/// contributes one.
///
/// Additional carries glue: A records for the targets of NS answers
/// (and of CNAME answers when not authoritative).
///
/// The aa flag is set from `authoritative`; rcode is left at zero for
/// the caller to adjust.
pub fn build_response(request: &Message, pool: &[ResourceRecord], authoritative: bool) -> Message {
    let question = &request.questions[0];

    let mut answers = Vec::new();
    push_matching(&mut answers, pool, &question.name, question.qtype);

    if authoritative {
        let mut current = question.name.clone();
        let mut seen = HashSet::new();
        while seen.insert(current.clone()) {
            let cname_rr = pool.iter().find(|rr| {
                rr.name == current && matches!(rr.rtype_with_data, RecordTypeWithData::CNAME { .. })
            });
            let Some(cname_rr) = cname_rr else { break };
            let RecordTypeWithData::CNAME { cname } = &cname_rr.rtype_with_data else {
                break;
            };

            if !answers.contains(cname_rr) {
                answers.push(cname_rr.clone());
            }
            push_matching(&mut answers, pool, cname, question.qtype);
            current = cname.clone();
        }
    }

    let mut authority = Vec::new();
    if question.qtype != RecordType::NS {
        for i in 0..question.name.labels.len() {
            let Some(suffix) = DomainName::from_labels(question.name.labels[i..].to_vec()) else {
                continue;
            };
            if suffix.is_root() {
                break;
            }
            for rr in pool {
                if rr.name == suffix && rr.rtype() == RecordType::NS {
                    authority.push(rr.clone());
                }
            }
            if !authority.is_empty() {
                break;
            }
        }
    }

    let mut additional = Vec::new();
    for rr in &answers {
        let target = match &rr.rtype_with_data {
            RecordTypeWithData::NS { nsdname } => Some(nsdname),
            RecordTypeWithData::CNAME { cname } if !authoritative => Some(cname),
            _ => None,
        };
        if let Some(target) = target {
            for glue in pool {
                if glue.name == *target
                    && glue.rtype() == RecordType::A
                    && !additional.contains(glue)
                {
                    additional.push(glue.clone());
                }
            }
        }
    }

    let mut response = request.make_response();
    response.header.is_authoritative = authoritative;
    response.answers = answers;
    response.authority = authority;
    response.additional = additional;
    response
}

fn push_matching(
    into: &mut Vec<ResourceRecord>,
    pool: &[ResourceRecord],
    name: &DomainName,
    rtype: RecordType,
) {
    for rr in pool {
        if rr.name == *name && rr.rtype() == rtype && !into.contains(rr) {
            into.push(rr.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    fn a_record(name: &str, address: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::A {
                address: address.parse().unwrap(),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    fn ns_record(name: &str, nsdname: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::NS {
                nsdname: domain(nsdname),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    fn cname_record(name: &str, target: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::CNAME {
                cname: domain(target),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    fn request(name: &str, qtype: RecordType) -> Message {
        Message::from_question(
            0x1234,
            Question {
                name: domain(name),
                qtype,
                qclass: RecordClass::IN,
            },
        )
    }

    #[test]
    fn answers_match_name_and_type() {
        let pool = [
            a_record("example.com.", "10.0.0.1"),
            a_record("other.example.com.", "10.0.0.2"),
            ns_record("example.com.", "ns1.example.com."),
        ];

        let response = build_response(&request("example.com.", RecordType::A), &pool, true);
        assert_eq!(vec![a_record("example.com.", "10.0.0.1")], response.answers);
        assert!(response.header.is_authoritative);
        assert_eq!(0x1234, response.header.id);
    }

    #[test]
    fn authority_is_closest_enclosing_delegation() {
        let pool = [
            a_record("www.example.com.", "10.0.0.1"),
            ns_record("example.com.", "ns1.example.com."),
            ns_record("example.com.", "ns2.example.com."),
            ns_record("com.", "ns.tld-servers.com."),
        ];

        let response = build_response(&request("www.example.com.", RecordType::A), &pool, true);
        assert_eq!(
            vec![
                ns_record("example.com.", "ns1.example.com."),
                ns_record("example.com.", "ns2.example.com."),
            ],
            response.authority
        );
    }

    #[test]
    fn authority_includes_ns_at_the_question_name_itself() {
        let pool = [
            a_record("example.com.", "10.0.0.1"),
            ns_record("example.com.", "ns1.example.com."),
        ];

        let response = build_response(&request("example.com.", RecordType::A), &pool, true);
        assert_eq!(
            vec![ns_record("example.com.", "ns1.example.com.")],
            response.authority
        );
    }

    #[test]
    fn ns_questions_get_no_authority() {
        let pool = [ns_record("example.com.", "ns1.example.com.")];

        let response = build_response(&request("example.com.", RecordType::NS), &pool, true);
        assert_eq!(pool.to_vec(), response.answers);
        assert!(response.authority.is_empty());
    }

    #[test]
    fn authoritative_mode_flattens_cname_chains() {
        let pool = [
            cname_record("a.tld.", "b.tld."),
            cname_record("b.tld.", "c.tld."),
            a_record("c.tld.", "10.0.0.5"),
        ];

        let response = build_response(&request("a.tld.", RecordType::A), &pool, true);
        assert_eq!(
            vec![
                cname_record("a.tld.", "b.tld."),
                cname_record("b.tld.", "c.tld."),
                a_record("c.tld.", "10.0.0.5"),
            ],
            response.answers
        );
    }

    #[test]
    fn cname_cycles_terminate() {
        let pool = [
            cname_record("a.tld.", "b.tld."),
            cname_record("b.tld.", "a.tld."),
        ];

        let response = build_response(&request("a.tld.", RecordType::A), &pool, true);
        assert_eq!(2, response.answers.len());
    }

    #[test]
    fn non_authoritative_mode_does_not_flatten() {
        let pool = [
            cname_record("a.tld.", "b.tld."),
            a_record("b.tld.", "10.0.0.5"),
        ];

        let response = build_response(&request("a.tld.", RecordType::A), &pool, false);
        assert!(response.answers.is_empty());
        assert!(!response.header.is_authoritative);
    }

    #[test]
    fn additional_carries_glue_for_ns_answers() {
        let pool = [
            ns_record("example.com.", "ns1.example.com."),
            a_record("ns1.example.com.", "10.0.0.3"),
        ];

        let response = build_response(&request("example.com.", RecordType::NS), &pool, true);
        assert_eq!(
            vec![a_record("ns1.example.com.", "10.0.0.3")],
            response.additional
        );
    }

    #[test]
    fn additional_carries_glue_for_cname_answers_when_not_authoritative() {
        let pool = [
            cname_record("a.tld.", "b.tld."),
            a_record("b.tld.", "10.0.0.5"),
        ];

        let response = build_response(&request("a.tld.", RecordType::CNAME), &pool, false);
        assert_eq!(vec![cname_record("a.tld.", "b.tld.")], response.answers);
        assert_eq!(vec![a_record("b.tld.", "10.0.0.5")], response.additional);
    }
}
