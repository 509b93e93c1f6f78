//! Parsing of master files into a flat record list.
//!
//! This implementation does not support `$INCLUDE` entries or non-`IN`
//! record classes.  These raise an error.

use bytes::Bytes;
use std::fmt;
use std::iter::Peekable;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::protocol::types::*;

/// Parse a string of zone data into resource records.
///
/// Entries are of the form:
///
/// ```text
/// $ORIGIN <domain-name>
/// $TTL <ttl>
/// <rr>
/// ```
///
/// Where `<rr>` is:
///
/// ```text
/// [<domain-name>] [<ttl>] [<class>] <type> <rdata>
/// ```
///
/// with the TTL and class in either order.  This is annoyingly
/// flexible:
///
/// - If the `<domain-name>` is missing (the line starts with
///   whitespace), the previous owner is used.
///
/// - If the `<ttl>` is missing, the `$TTL` default or the previous
///   record's TTL is used; it is an error for the first record to omit
///   it with no `$TTL` in effect.
///
/// - The `<domain-name>` can be absolute (ending in `.`), relative (in
///   which case the origin is appended), or `@` (the origin itself).
///
/// Some special characters are:
///
/// - `;` - the rest of the line is a comment
/// - `" ... "` - a string (used for TXT rdata)
/// - `( ... )` - a group of data which crosses a newline
///
/// # Errors
///
/// If the string cannot be parsed.
pub fn parse(data: &str) -> Result<Vec<ResourceRecord>, Error> {
    let mut rrs = Vec::new();
    let mut origin = None;
    let mut previous_domain = None;
    let mut previous_ttl = None;
    let mut default_ttl = None;
    let mut stream = data.chars().peekable();

    loop {
        let (tokens, leading_ws) = tokenise_entry(&mut stream)?;
        if tokens.is_empty() {
            if stream.peek().is_none() {
                break;
            }
            continue;
        }

        if tokens[0] == "$ORIGIN" {
            if tokens.len() != 2 {
                return Err(Error::WrongLen { tokens });
            }
            origin = Some(parse_domain(&origin, &tokens[1])?);
        } else if tokens[0] == "$TTL" {
            if tokens.len() != 2 {
                return Err(Error::WrongLen { tokens });
            }
            default_ttl = Some(parse_u32(&tokens[1])?);
        } else if tokens[0] == "$INCLUDE" {
            return Err(Error::IncludeNotSupported);
        } else if tokens[0].starts_with('$') {
            return Err(Error::UnknownDirective {
                directive: tokens[0].clone(),
            });
        } else {
            let rr = parse_rr(
                &origin,
                &previous_domain,
                default_ttl.or(previous_ttl),
                &tokens,
                leading_ws,
            )?;
            previous_domain = Some(rr.name.clone());
            previous_ttl = Some(rr.ttl);
            rrs.push(rr);
        }
    }

    Ok(rrs)
}

/// Parse a single RR entry.
fn parse_rr(
    origin: &Option<DomainName>,
    previous_domain: &Option<DomainName>,
    fallback_ttl: Option<u32>,
    tokens: &[String],
    leading_ws: bool,
) -> Result<ResourceRecord, Error> {
    let mut idx = 0;

    let name = if leading_ws {
        previous_domain
            .clone()
            .ok_or(Error::MissingPreviousDomain)?
    } else {
        idx = 1;
        parse_domain(origin, &tokens[0])?
    };

    // TTL and class may both be omitted, and may appear in either
    // order.
    let mut ttl = None;
    let mut seen_class = false;
    while idx < tokens.len() {
        let token = &tokens[idx];
        if !seen_class && token == "IN" {
            seen_class = true;
            idx += 1;
        } else if token == "CS" || token == "CH" || token == "HS" {
            return Err(Error::UnsupportedClass {
                class: token.clone(),
            });
        } else if ttl.is_none() && !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            ttl = Some(parse_u32(token)?);
            idx += 1;
        } else {
            break;
        }
    }

    let Some(type_token) = tokens.get(idx) else {
        return Err(Error::MissingType {
            tokens: tokens.to_vec(),
        });
    };
    let rtype = RecordType::from_str(type_token).map_err(|_| Error::UnsupportedType {
        rtype: type_token.clone(),
    })?;
    idx += 1;

    let ttl = ttl.or(fallback_ttl).ok_or(Error::MissingTTL)?;
    let rtype_with_data = parse_rdata(origin, rtype, &tokens[idx..])?;

    Ok(ResourceRecord {
        name,
        rtype_with_data,
        rclass: RecordClass::IN,
        ttl,
    })
}

/// Parse the RDATA portion of an entry, which depends on the record
/// type.
fn parse_rdata(
    origin: &Option<DomainName>,
    rtype: RecordType,
    tokens: &[String],
) -> Result<RecordTypeWithData, Error> {
    match rtype {
        RecordType::A => {
            let [address] = tokens else {
                return Err(Error::WrongRdataLen { rtype, tokens: tokens.to_vec() });
            };
            Ok(RecordTypeWithData::A {
                address: Ipv4Addr::from_str(address).map_err(|_| Error::BadAddress {
                    address: address.clone(),
                })?,
            })
        }
        RecordType::AAAA => {
            let [address] = tokens else {
                return Err(Error::WrongRdataLen { rtype, tokens: tokens.to_vec() });
            };
            Ok(RecordTypeWithData::AAAA {
                address: Ipv6Addr::from_str(address).map_err(|_| Error::BadAddress {
                    address: address.clone(),
                })?,
            })
        }
        RecordType::NS => {
            let [nsdname] = tokens else {
                return Err(Error::WrongRdataLen { rtype, tokens: tokens.to_vec() });
            };
            Ok(RecordTypeWithData::NS {
                nsdname: parse_domain(origin, nsdname)?,
            })
        }
        RecordType::CNAME => {
            let [cname] = tokens else {
                return Err(Error::WrongRdataLen { rtype, tokens: tokens.to_vec() });
            };
            Ok(RecordTypeWithData::CNAME {
                cname: parse_domain(origin, cname)?,
            })
        }
        RecordType::PTR => {
            let [ptrdname] = tokens else {
                return Err(Error::WrongRdataLen { rtype, tokens: tokens.to_vec() });
            };
            Ok(RecordTypeWithData::PTR {
                ptrdname: parse_domain(origin, ptrdname)?,
            })
        }
        RecordType::MX => {
            let [preference, exchange] = tokens else {
                return Err(Error::WrongRdataLen { rtype, tokens: tokens.to_vec() });
            };
            Ok(RecordTypeWithData::MX {
                preference: parse_u32(preference)?
                    .try_into()
                    .map_err(|_| Error::BadInt {
                        digits: preference.clone(),
                    })?,
                exchange: parse_domain(origin, exchange)?,
            })
        }
        RecordType::TXT => {
            if tokens.is_empty() {
                return Err(Error::WrongRdataLen {
                    rtype,
                    tokens: tokens.to_vec(),
                });
            }
            let mut octets = Vec::new();
            for token in tokens {
                octets.extend_from_slice(token.as_bytes());
            }
            Ok(RecordTypeWithData::TXT {
                octets: Bytes::from(octets),
            })
        }
        RecordType::SOA => {
            let [mname, rname, serial, refresh, retry, expire, minimum] = tokens else {
                return Err(Error::WrongRdataLen { rtype, tokens: tokens.to_vec() });
            };
            Ok(RecordTypeWithData::SOA {
                mname: parse_domain(origin, mname)?,
                rname: parse_domain(origin, rname)?,
                serial: parse_u32(serial)?,
                refresh: parse_u32(refresh)?,
                retry: parse_u32(retry)?,
                expire: parse_u32(expire)?,
                minimum: parse_u32(minimum)?,
            })
        }
        RecordType::Unknown(_) => Err(Error::UnsupportedType {
            rtype: rtype.to_string(),
        }),
    }
}

/// Parse a domain token: `@` is the origin, a name ending in `.` is
/// absolute, anything else is relative to the origin.
fn parse_domain(origin: &Option<DomainName>, token: &str) -> Result<DomainName, Error> {
    if token == "@" {
        return origin.clone().ok_or(Error::MissingOrigin);
    }

    if token.ends_with('.') {
        DomainName::from_dotted_string(token).ok_or_else(|| Error::BadDomain {
            name: token.to_string(),
        })
    } else {
        let suffix = origin.as_ref().ok_or(Error::MissingOrigin)?.to_dotted_string();
        let combined = if suffix.starts_with('.') {
            format!("{token}{suffix}")
        } else {
            format!("{token}.{suffix}")
        };
        DomainName::from_dotted_string(&combined).ok_or_else(|| Error::BadDomain {
            name: token.to_string(),
        })
    }
}

fn parse_u32(token: &str) -> Result<u32, Error> {
    u32::from_str(token).map_err(|_| Error::BadInt {
        digits: token.to_string(),
    })
}

/// Read one entry's worth of tokens, skipping comments and handling
/// `( ... )` groups and `" ... "` strings.  Also reports whether the
/// entry began with whitespace (which means the owner name is
/// omitted).
fn tokenise_entry<I: Iterator<Item = char>>(
    stream: &mut Peekable<I>,
) -> Result<(Vec<String>, bool), Error> {
    let leading_ws = matches!(stream.peek(), Some(&' ' | &'\t'));
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut group_depth = 0usize;

    loop {
        match stream.next() {
            None => {
                if group_depth > 0 {
                    return Err(Error::UnclosedGroup);
                }
                if !token.is_empty() {
                    tokens.push(token);
                }
                break;
            }
            Some('\n') => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                if group_depth == 0 {
                    break;
                }
            }
            Some(';') => {
                // comment runs to the end of the line
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                for c in stream.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                if group_depth == 0 {
                    break;
                }
            }
            Some('(') => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                group_depth += 1;
            }
            Some(')') => {
                if group_depth == 0 {
                    return Err(Error::UnexpectedGroupEnd);
                }
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                group_depth -= 1;
            }
            Some('"') => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                let mut string = String::new();
                loop {
                    match stream.next() {
                        None | Some('\n') => return Err(Error::UnclosedString),
                        Some('"') => break,
                        Some(c) => string.push(c),
                    }
                }
                tokens.push(string);
            }
            Some(c) if c.is_whitespace() => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
            }
            Some(c) => token.push(c),
        }
    }

    Ok((tokens, leading_ws))
}

/// Errors that can arise when parsing a master file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
    IncludeNotSupported,
    UnknownDirective { directive: String },
    UnclosedGroup,
    UnexpectedGroupEnd,
    UnclosedString,
    WrongLen { tokens: Vec<String> },
    WrongRdataLen { rtype: RecordType, tokens: Vec<String> },
    MissingPreviousDomain,
    MissingOrigin,
    MissingTTL,
    MissingType { tokens: Vec<String> },
    UnsupportedClass { class: String },
    UnsupportedType { rtype: String },
    BadDomain { name: String },
    BadAddress { address: String },
    BadInt { digits: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IncludeNotSupported => write!(f, "$INCLUDE entries are not supported"),
            Error::UnknownDirective { directive } => write!(f, "unknown directive '{directive}'"),
            Error::UnclosedGroup => write!(f, "unclosed '('"),
            Error::UnexpectedGroupEnd => write!(f, "')' without matching '('"),
            Error::UnclosedString => write!(f, "unclosed '\"'"),
            Error::WrongLen { tokens } => {
                write!(f, "directive has the wrong number of tokens: {tokens:?}")
            }
            Error::WrongRdataLen { rtype, tokens } => {
                write!(f, "wrong number of rdata tokens for {rtype}: {tokens:?}")
            }
            Error::MissingPreviousDomain => {
                write!(f, "first record cannot omit the owner name")
            }
            Error::MissingOrigin => {
                write!(f, "relative name or '@' used with no $ORIGIN in effect")
            }
            Error::MissingTTL => {
                write!(f, "first record cannot omit the TTL with no $TTL in effect")
            }
            Error::MissingType { tokens } => write!(f, "record has no type: {tokens:?}"),
            Error::UnsupportedClass { class } => write!(f, "unsupported class '{class}'"),
            Error::UnsupportedType { rtype } => write!(f, "unsupported record type '{rtype}'"),
            Error::BadDomain { name } => write!(f, "could not parse domain name '{name}'"),
            Error::BadAddress { address } => write!(f, "could not parse address '{address}'"),
            Error::BadInt { digits } => write!(f, "could not parse number '{digits}'"),
        }
    }
}

impl std::error::Error for Error {}
