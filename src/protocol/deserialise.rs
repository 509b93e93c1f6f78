//! Parsing received datagrams into `Message`s.  The wire layout is
//! documented on the types themselves.

use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ReadCursor::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ReadCursor) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(wire_header.header.id, buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

/// The header as it appears on the wire: the parsed flags plus the
/// four section counts.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    pub header: Header,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ReadCursor) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from(flags2 & HEADER_MASK_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ReadCursor) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer
            .next_u16()
            .map(RecordType::from)
            .ok_or(Error::QuestionTooShort(id))?;
        let qclass = buffer
            .next_u16()
            .map(RecordClass::from)
            .ok_or(Error::QuestionTooShort(id))?;

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ReadCursor) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = buffer
            .next_u16()
            .map(RecordType::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let rclass = buffer
            .next_u16()
            .map(RecordClass::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_start = buffer.position;

        // rdata containing domain names is parsed here, so any
        // compression pointers are expanded before anything downstream
        // sees the record
        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::SOA => RecordTypeWithData::SOA {
                mname: DomainName::deserialise(id, buffer)?,
                rname: DomainName::deserialise(id, buffer)?,
                serial: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                refresh: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                retry: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                expire: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                minimum: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::MX => RecordTypeWithData::MX {
                preference: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                exchange: DomainName::deserialise(id, buffer)?,
            },
            RecordType::TXT => RecordTypeWithData::TXT {
                octets: rdata_bytes(id, buffer, rdlength)?,
            },
            RecordType::AAAA => RecordTypeWithData::AAAA {
                address: Ipv6Addr::new(
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                    buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: rdata_bytes(id, buffer, rdlength)?,
            },
        };

        // whatever the type-specific parsing consumed has to occupy
        // exactly RDLENGTH octets
        if buffer.position - rdata_start != usize::from(rdlength) {
            return Err(Error::ResourceRecordInvalid(id));
        }

        Ok(Self {
            name,
            rtype_with_data,
            rclass,
            ttl,
        })
    }
}

/// Uninterpreted RDATA (TXT and unknown record types): RDLENGTH octets
/// taken as-is.
fn rdata_bytes(id: u16, buffer: &mut ReadCursor, rdlength: u16) -> Result<Bytes, Error> {
    match buffer.take(rdlength.into()) {
        Some(octets) => Ok(Bytes::copy_from_slice(octets)),
        None => Err(Error::ResourceRecordTooShort(id)),
    }
}

impl DomainName {
    /// Read a domain name, following compression pointers.
    ///
    /// # Errors
    ///
    /// If the name is truncated, over-long, or has a bad pointer.
    #[allow(clippy::missing_panics_doc)]
    pub fn deserialise(id: u16, buffer: &mut ReadCursor) -> Result<Self, Error> {
        let mut labels = Vec::<Label>::with_capacity(5);
        let mut len = 0;
        let name_start = buffer.position;

        loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if size == 0 {
                len += 1;
                labels.push(Label::new());
                break;
            } else if usize::from(size) <= LABEL_MAX_LEN {
                let octets = buffer
                    .take(size.into())
                    .ok_or(Error::DomainTooShort(id))?;
                // cannot fail: size is within the label bound
                let label = Label::try_from(octets).unwrap();
                len += 1 + usize::from(label.len());
                labels.push(label);

                if len > DOMAINNAME_MAX_LEN {
                    return Err(Error::DomainTooLong(id));
                }
            } else if size & 0b1100_0000 == 0b1100_0000 {
                // a compression pointer: the low 14 bits give the
                // offset where the rest of the name lives.  Section
                // 4.1.4 of RFC 1035 only permits pointing at earlier
                // data, and insisting on that here also rules out
                // pointer loops.
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let target = usize::from(u16::from_be_bytes([size & 0b0011_1111, lo]));
                if target >= name_start {
                    return Err(Error::DomainPointerInvalid(id));
                }

                // read the tail through a second cursor, leaving this
                // one just past the pointer
                let mut tail = DomainName::deserialise(id, &mut buffer.forked_at(target))?;
                len += tail.len;
                labels.append(&mut tail.labels);
                break;
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if len > DOMAINNAME_MAX_LEN {
            Err(Error::DomainTooLong(id))
        } else {
            Ok(DomainName { labels, len })
        }
    }
}

/// Errors encountered when parsing a datagram.  Every variant except
/// the first carries the header id, tying the failure to the query it
/// came from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// Too short to even contain a message id.
    CompletelyBusted,

    /// The fixed-size header is cut off.
    HeaderTooShort(u16),

    /// A question ends mid-field.
    QuestionTooShort(u16),

    /// A resource record ends mid-field.
    ResourceRecordTooShort(u16),

    /// A resource record's RDATA does not occupy exactly RDLENGTH
    /// octets.
    ResourceRecordInvalid(u16),

    /// A domain name is cut off.
    DomainTooShort(u16),

    /// A domain name exceeds 255 octets.
    DomainTooLong(u16),

    /// A compression pointer does not point strictly backwards.
    DomainPointerInvalid(u16),

    /// A label length over 63 that is not a compression pointer.
    DomainLabelInvalid(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted => None,
            Error::HeaderTooShort(id) => Some(id),
            Error::QuestionTooShort(id) => Some(id),
            Error::ResourceRecordTooShort(id) => Some(id),
            Error::ResourceRecordInvalid(id) => Some(id),
            Error::DomainTooShort(id) => Some(id),
            Error::DomainTooLong(id) => Some(id),
            Error::DomainPointerInvalid(id) => Some(id),
            Error::DomainLabelInvalid(id) => Some(id),
        }
    }
}

/// A cursor over the raw datagram.  Reads advance the position and
/// fail with `None` once the data runs out; compression pointers are
/// followed by forking a second cursor at the pointed-to offset.
pub struct ReadCursor<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        let octet = *self.octets.get(self.position)?;
        self.position += 1;
        Some(octet)
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        Some(u16::from_be_bytes(self.take(2)?.try_into().ok()?))
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        Some(u32::from_be_bytes(self.take(4)?.try_into().ok()?))
    }

    pub fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let slice = self.octets.get(self.position..self.position + count)?;
        self.position += count;
        Some(slice)
    }

    /// A second cursor over the same datagram, starting at `position`.
    pub fn forked_at(&self, position: usize) -> ReadCursor<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    #[test]
    #[rustfmt::skip]
    fn deserialise_expands_pointers() {
        // query for www.example.com. with an answer whose name is a
        // pointer back into the question
        let octets = [
            0x12, 0x34, // ID
            0b0000_0000, 0b0000_0000, // flags
            0, 1, // QDCOUNT
            0, 1, // ANCOUNT
            0, 0, // NSCOUNT
            0, 0, // ARCOUNT
            // question: www.example.com. A IN
            3, b'w', b'w', b'w',
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e',
            3, b'c', b'o', b'm', 0,
            0, 1, // A
            0, 1, // IN
            // answer: pointer to offset 12, A IN 300 1.2.3.4
            0b1100_0000, 12,
            0, 1, // A
            0, 1, // IN
            0, 0, 1, 44, // TTL 300
            0, 4, // RDLENGTH
            1, 2, 3, 4,
        ];

        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(domain("www.example.com."), message.questions[0].name);
        assert_eq!(domain("www.example.com."), message.answers[0].name);
        assert_eq!(
            RecordTypeWithData::A {
                address: "1.2.3.4".parse().unwrap()
            },
            message.answers[0].rtype_with_data
        );
    }

    #[test]
    fn deserialise_rejects_forward_pointer() {
        #[rustfmt::skip]
        let octets = [
            0x12, 0x34,
            0b0000_0000, 0b0000_0000,
            0, 1, // QDCOUNT
            0, 0,
            0, 0,
            0, 0,
            // question name is a pointer to itself
            0b1100_0000, 12,
            0, 1,
            0, 1,
        ];

        assert_eq!(
            Err(Error::DomainPointerInvalid(0x1234)),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn deserialise_rejects_truncated_header() {
        assert_eq!(Err(Error::CompletelyBusted), Message::from_octets(&[0x12]));
        assert_eq!(
            Err(Error::HeaderTooShort(0x1234)),
            Message::from_octets(&[0x12, 0x34, 0, 0])
        );
    }

    #[test]
    fn deserialise_rejects_count_mismatch() {
        #[rustfmt::skip]
        let octets = [
            0x12, 0x34,
            0b0000_0000, 0b0000_0000,
            0, 2, // QDCOUNT claims two questions
            0, 0,
            0, 0,
            0, 0,
            0, // question: root
            0, 1,
            0, 1,
            // and nothing else
        ];

        assert_eq!(
            Err(Error::DomainTooShort(0x1234)),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn deserialise_rejects_bad_rdlength() {
        #[rustfmt::skip]
        let octets = [
            0x12, 0x34,
            0b1000_0000, 0b0000_0000,
            0, 0,
            0, 1, // ANCOUNT
            0, 0,
            0, 0,
            0, // name: root
            0, 1, // A
            0, 1, // IN
            0, 0, 1, 44, // TTL
            0, 2, // RDLENGTH too small for an A address
            1, 2, 3, 4,
        ];

        assert_eq!(
            Err(Error::ResourceRecordInvalid(0x1234)),
            Message::from_octets(&octets)
        );
    }
}
