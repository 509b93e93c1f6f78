use fake::{Fake, Faker};

use referred::protocol::deserialise::ReadCursor;
use referred::protocol::serialise::WritableBuffer;
use referred::protocol::types::*;

#[test]
fn roundtrip_message() {
    for _ in 0..100 {
        let original = arbitrary_message();
        let octets = original.clone().into_octets().unwrap();
        let deserialised = Message::from_octets(&octets);

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_question() {
    for _ in 0..100 {
        let original = arbitrary_question();

        let mut buffer = WritableBuffer::default();
        original.clone().serialise(&mut buffer);
        let deserialised = Question::deserialise(0, &mut ReadCursor::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_resourcerecord() {
    for _ in 0..100 {
        let original = arbitrary_resourcerecord();

        let mut buffer = WritableBuffer::default();
        original.clone().serialise(&mut buffer).unwrap();
        let deserialised =
            ResourceRecord::deserialise(0, &mut ReadCursor::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_domainname() {
    for _ in 0..100 {
        let original = arbitrary_domainname();

        let mut buffer = WritableBuffer::default();
        original.clone().serialise(&mut buffer);
        let deserialised = DomainName::deserialise(0, &mut ReadCursor::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

fn arbitrary_message() -> Message {
    let num_questions = (0..3).fake::<usize>();
    let questions = (0..num_questions).map(|_| arbitrary_question()).collect();

    Message {
        header: arbitrary_header(),
        questions,
        answers: section(),
        authority: section(),
        additional: section(),
    }
}

fn section() -> Vec<ResourceRecord> {
    let len = (0..3).fake::<usize>();
    (0..len).map(|_| arbitrary_resourcerecord()).collect()
}

fn arbitrary_header() -> Header {
    Header {
        id: Faker.fake(),
        is_response: Faker.fake(),
        opcode: arbitrary_opcode(),
        is_authoritative: Faker.fake(),
        is_truncated: Faker.fake(),
        recursion_desired: Faker.fake(),
        recursion_available: Faker.fake(),
        rcode: arbitrary_rcode(),
    }
}

fn arbitrary_question() -> Question {
    Question {
        name: arbitrary_domainname(),
        qtype: arbitrary_recordtype(),
        qclass: arbitrary_recordclass(),
    }
}

fn arbitrary_resourcerecord() -> ResourceRecord {
    ResourceRecord {
        name: arbitrary_domainname(),
        rtype_with_data: arbitrary_recordtypewithdata(),
        rclass: arbitrary_recordclass(),
        ttl: Faker.fake(),
    }
}

fn arbitrary_recordtypewithdata() -> RecordTypeWithData {
    // this should match the `RecordTypeWithData` deserialisation
    match arbitrary_recordtype() {
        RecordType::A => RecordTypeWithData::A {
            address: std::net::Ipv4Addr::from(Faker.fake::<u32>()),
        },
        RecordType::NS => RecordTypeWithData::NS {
            nsdname: arbitrary_domainname(),
        },
        RecordType::CNAME => RecordTypeWithData::CNAME {
            cname: arbitrary_domainname(),
        },
        RecordType::SOA => RecordTypeWithData::SOA {
            mname: arbitrary_domainname(),
            rname: arbitrary_domainname(),
            serial: Faker.fake(),
            refresh: Faker.fake(),
            retry: Faker.fake(),
            expire: Faker.fake(),
            minimum: Faker.fake(),
        },
        RecordType::PTR => RecordTypeWithData::PTR {
            ptrdname: arbitrary_domainname(),
        },
        RecordType::MX => RecordTypeWithData::MX {
            preference: Faker.fake(),
            exchange: arbitrary_domainname(),
        },
        RecordType::TXT => RecordTypeWithData::TXT {
            octets: arbitrary_octets((0..64).fake()),
        },
        RecordType::AAAA => RecordTypeWithData::AAAA {
            address: std::net::Ipv6Addr::from(Faker.fake::<u128>()),
        },
        RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
            tag,
            octets: arbitrary_octets((0..64).fake()),
        },
    }
}

fn arbitrary_domainname() -> DomainName {
    let num_labels = (1..5).fake::<usize>();
    let mut labels = Vec::with_capacity(num_labels + 1);

    for _ in 0..num_labels {
        let label_len = (1..20).fake::<usize>();
        let mut octets = Vec::with_capacity(label_len);
        for _ in 0..label_len {
            octets.push(Faker.fake::<u8>() % 26 + b'a');
        }
        labels.push(Label::try_from(&octets[..]).unwrap());
    }

    labels.push(Label::new());
    DomainName::from_labels(labels).unwrap()
}

fn arbitrary_opcode() -> Opcode {
    // opcode is a 4-bit field
    (Faker.fake::<u8>() & 0b0000_1111).into()
}

fn arbitrary_rcode() -> Rcode {
    // rcode is a 4-bit field
    (Faker.fake::<u8>() & 0b0000_1111).into()
}

fn arbitrary_recordtype() -> RecordType {
    Faker.fake::<u16>().into()
}

fn arbitrary_recordclass() -> RecordClass {
    Faker.fake::<u16>().into()
}

fn arbitrary_octets(len: usize) -> bytes::Bytes {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(Faker.fake());
    }
    bytes::Bytes::from(out)
}
