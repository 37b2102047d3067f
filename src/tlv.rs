//! TLV data structures.
//!
//! Template constructors for the classic smart-card record shapes:
//! the plain [`tlv`] (which does not distinguish primitive from
//! constructed records), the [`lv`] and [`tl`] fragments, the repeated
//! list variants, the full recursive [`ber_tlv`], and Data Object List
//! helpers.

use crate::bitset::Bitset;
use crate::error::{EngineError, Result};
use crate::field::Binding;
use crate::num::{Num, Radix};
use crate::pattern::{Pattern, Shape, Value};
use crate::repeat::{List, Repeater};
use crate::table::Table;

/// Width of a tag: two bytes when the five tag-number bits of the first
/// byte are all ones.
fn tag_size(_: &Table, data: &Num) -> Result<Shape> {
    Ok(if data.byte(0)? & 0x1F == 0x1F {
        Shape::Units(2)
    } else {
        Shape::Units(1)
    })
}

/// Width of a length field: one byte below 0x80, otherwise `0x8n`
/// announces `n` further length bytes.
fn len_size(_: &Table, data: &Num) -> Result<Shape> {
    let b = data.byte(0)?;
    Ok(if b & 0x80 == 0x80 {
        Shape::Units(1 + usize::from(b & 0x0F))
    } else {
        Shape::Units(1)
    })
}

/// Width of the value, as announced by the already-matched Len field.
fn value_size(tlv: &Table, _: &Num) -> Result<Shape> {
    let len = tlv.get("Len")?.to_num()?;
    Ok(Shape::Units(decoded_len(&len)?))
}

/// The value width a Length field encodes (short or long form).
pub fn decoded_len(len: &Num) -> Result<usize> {
    if len.is_null() {
        return Ok(0);
    }
    if len.byte(0)? & 0x80 == 0x80 {
        Ok(len.slice(1..).to_usize().unwrap_or(0))
    } else {
        Ok(len.to_usize().unwrap_or(0))
    }
}

/// BER length encoding of a value: its byte count below 0x80 stays a
/// single byte, otherwise `0x80 + n` is followed by the `n`-byte count.
///
/// This is the binding installed on the Len field of [`tlv`] and
/// [`ber_tlv`]; a NULL value encodes as `00`.
pub fn encoded_len(value: &Value) -> Result<Num> {
    let num = value.to_num()?;
    if num.is_null() {
        return Ok(Radix::Hex.of(0));
    }
    let hex = num.to_radix(Radix::Hex);
    let k = Radix::Hex.of(hex.len() as u64);
    if k < Radix::Hex.of(0x80) {
        return Ok(k);
    }
    Radix::Hex.of(0x80 + k.len() as u64).concat(&k)
}

/// Tag-Length-Value template.
///
/// Len carries a binding deriving the BER length encoding of Value, so
/// an authored record always serializes with a consistent length.
pub fn tlv() -> Result<Table> {
    let t = Table::new();
    t.add(Pattern::func(tag_size), "Tag", "00")?
        .add(
            Pattern::func(len_size),
            "Len",
            Binding::new("Value", encoded_len),
        )?
        .add(Pattern::func(value_size), "Value", "00")?;
    Ok(t)
}

/// Length-Value template.
pub fn lv() -> Result<Table> {
    let t = Table::new();
    t.add(
        Pattern::func(len_size),
        "Len",
        Binding::new("Value", encoded_len),
    )?
    .add(Pattern::func(value_size), "Value", "00")?;
    Ok(t)
}

/// Tag-Length template, the element of a Data Object List.
pub fn tl() -> Result<Table> {
    let t = Table::new();
    t.add(Pattern::func(tag_size), "Tag", "00")?
        .add(Pattern::func(len_size), "Len", "00")?;
    Ok(t)
}

/// A repeated sequence of [`tlv`] records.
pub fn tlv_list() -> Result<Repeater> {
    Ok(Repeater::new(tlv()?))
}

/// A repeated sequence of [`lv`] records.
pub fn lv_list() -> Result<Repeater> {
    Ok(Repeater::new(lv()?))
}

/// A repeated sequence of [`tl`] records: a Data Object List.
pub fn tl_list() -> Result<Repeater> {
    Ok(Repeater::new(tl()?))
}

/// Alias for [`tl_list`] under its EMV name.
pub fn dol() -> Result<Repeater> {
    tl_list()
}

fn ber_class() -> Result<Bitset> {
    let mut bs = Bitset::new(2);
    bs.set("UniversalClass", "00")?;
    bs.set("ApplicationClass", "01")?;
    bs.set("ContextSpecificClass", "10")?;
    bs.set("PrivateClass", "11")?;
    Ok(bs)
}

fn primitive_constructed() -> Result<Bitset> {
    let mut bs = Bitset::new(1);
    bs.set("Primitive", 0)?;
    bs.set("Constructed", 1)?;
    Ok(bs)
}

/// First tag byte as a bitmap: class (2 bits), primitive/constructed
/// (1 bit), tag number (5 bits).
fn tag_head() -> Result<Table> {
    let b = Table::new_bitmap();
    b.add(ber_class()?, "BerClass", 0)?
        .add(primitive_constructed()?, "PC", 1)?
        .add(5, "TagNumber", 0)?;
    Ok(b)
}

/// Long-form continuation bytes: present when the head's tag number is
/// 0x1F; every byte but the last carries the high bit.
fn long_form(tag: &Table, data: &Num) -> Result<Shape> {
    let head = tag.get("Head")?;
    let head = head.as_table().ok_or(EngineError::ValueKind {
        expected: "table",
        found: "number",
    })?;
    let tag_number = head.get("TagNumber")?.to_num()?;
    if tag_number != 0x1F {
        return Ok(Shape::Units(0));
    }
    let mut k = 0;
    while k < data.len() && data.byte(k)? & 0x80 == 0x80 {
        k += 1;
    }
    Ok(Shape::Units(k + 1))
}

/// BER tag: bitmapped head byte plus optional long-form tail.
pub fn ber_tag() -> Result<Table> {
    let t = Table::new();
    t.add(tag_head()?, "Head", 0)?
        .add(Pattern::func(long_form), "Tail", 0)?;
    Ok(t)
}

/// Value matcher of a BER TLV: opaque bytes for a primitive record, a
/// recursively parsed TLV list for a constructed one.
fn primitive_or_constructed(tlv: &Table, _: &Num) -> Result<Shape> {
    let len = tlv.get("Len")?.to_num()?;
    let size = decoded_len(&len)?;
    let tag = tlv.get("Tag")?;
    let tag = tag.as_table().ok_or(EngineError::ValueKind {
        expected: "table",
        found: "number",
    })?;
    let pc = tag.find("PC")?;
    if pc == 1u64 {
        Ok(Shape::Pat(Pattern::Window {
            size,
            inner: Box::new(Pattern::Repeat(ber_tlv_list()?)),
        }))
    } else {
        Ok(Shape::Units(size))
    }
}

/// Full BER TLV: multi-byte tags, long-form lengths, and constructed
/// values parsed recursively into lists of TLVs.
pub fn ber_tlv() -> Result<Table> {
    let t = Table::new();
    t.add(ber_tag()?, "Tag", 0)?
        .add(
            Pattern::func(len_size),
            "Len",
            Binding::new("Value", encoded_len),
        )?
        .add(Pattern::func(primitive_or_constructed), "Value", "00")?;
    Ok(t)
}

/// A repeated sequence of [`ber_tlv`] records.
pub fn ber_tlv_list() -> Result<Repeater> {
    Ok(Repeater::new(ber_tlv()?))
}

/// Depth-first search for the record carrying `tag`, descending into
/// constructed values.
pub fn find_tag(tlv: &Table, tag: &Num) -> Result<Option<Table>> {
    let own = tlv.get("Tag")?.to_num()?;
    if own == *tag {
        return Ok(Some(tlv.clone()));
    }
    if let Value::List(list) = tlv.get("Value")? {
        for item in list.items() {
            if let Value::Table(t) = item {
                if let Some(hit) = find_tag(&t, tag)? {
                    return Ok(Some(hit));
                }
            }
        }
    }
    Ok(None)
}

/// Split a concatenated value according to a Data Object List: each
/// (Tag, Len) pair takes its slice of the data, yielding built TLVs.
pub fn parse_with_dol(data: &Num, dol: &List) -> Result<Vec<Table>> {
    let mut offset = 0usize;
    let mut out = Vec::new();
    for item in dol.items() {
        let tl = item.as_table().ok_or(EngineError::ValueKind {
            expected: "table",
            found: "number",
        })?;
        let tag = tl.get("Tag")?.to_num()?;
        let len = tl.get("Len")?.to_num()?.to_usize().unwrap_or(0);
        let piece = data.slice(offset..offset + len);
        out.push(tlv()?.with_values([
            ("Tag", Value::Num(tag)),
            ("Value", Value::Num(piece)),
        ])?);
        offset += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn h(s: &str) -> Num {
        Radix::Hex.parse(s).unwrap()
    }

    fn zeros(n: usize) -> Num {
        Radix::Hex.from_bytes(&vec![0u8; n]).unwrap()
    }

    #[test]
    fn test_tag() {
        let tag = ber_tag().unwrap().parse(&h("C0")).unwrap();
        let head = tag.get("Head").unwrap();
        let head = head.as_table().unwrap();
        assert_eq!(head.get("BerClass").unwrap(), 0x03u64);
        assert_eq!(head.get("TagNumber").unwrap(), 0u64);
        assert!(tag.get("Tail").unwrap().is_null());

        let tlv = ber_tlv().unwrap().parse(&h("80 02 00 00")).unwrap();
        assert_eq!(tlv.get("Tag").unwrap().to_num().unwrap(), 0x80u64);
        assert_eq!(tlv.get("Len").unwrap(), 2u64);
        assert_eq!(tlv.get("Value").unwrap(), h("00 00"));

        let tlv = ber_tlv().unwrap().parse(&h("7F 05 03 80 01 00")).unwrap();
        assert_eq!(tlv.get("Tag").unwrap().to_num().unwrap(), 0x7F05u64);
        assert_eq!(tlv.get("Len").unwrap(), 3u64);
        assert!(matches!(tlv.get("Value").unwrap(), Value::List(_)));
        let hit = find_tag(&tlv, &h("80")).unwrap().unwrap();
        assert_eq!(hit.get("Value").unwrap(), 0x00u64);
    }

    #[test]
    fn test_multibyte_long_form_tag() {
        // Two continuation bytes: 0x81 chains, 0x05 terminates.
        let tag = ber_tag().unwrap().parse(&h("7F 81 05 01")).unwrap();
        assert_eq!(tag.get("Tail").unwrap(), h("81 05"));
        assert_eq!(tag.value().unwrap(), h("7F 81 05"));
    }

    #[test]
    fn test_length_short_form() {
        let parsed = tlv().unwrap().parse(&h("80 00")).unwrap();
        assert_eq!(parsed.get("Len").unwrap(), h("00"));

        let built = tlv()
            .unwrap()
            .with_values([("Tag", Value::Num(h("80"))), ("Value", Value::Num(Num::Null))])
            .unwrap();
        assert_eq!(built.get("Len").unwrap(), h("00"));

        let data = h("80 7F").concat(&zeros(0x7F)).unwrap();
        let parsed = tlv().unwrap().parse(&data).unwrap();
        assert_eq!(parsed.get("Len").unwrap(), h("7F"));
        let built = tlv()
            .unwrap()
            .with_values([("Tag", Value::Num(h("80"))), ("Value", Value::Num(zeros(0x7F)))])
            .unwrap();
        assert_eq!(built.get("Len").unwrap(), h("7F"));
    }

    #[test]
    fn test_length_long_form() {
        let data = h("80 81 80").concat(&zeros(0x80)).unwrap();
        let parsed = tlv().unwrap().parse(&data).unwrap();
        assert_eq!(parsed.get("Len").unwrap(), h("81 80"));
        let built = tlv()
            .unwrap()
            .with_values([("Tag", Value::Num(h("80"))), ("Value", Value::Num(zeros(0x80)))])
            .unwrap();
        assert_eq!(built.get("Len").unwrap(), h("81 80"));

        let data = h("80 82 01 20").concat(&zeros(0x120)).unwrap();
        let parsed = tlv().unwrap().parse(&data).unwrap();
        assert_eq!(parsed.get("Len").unwrap(), h("82 01 20"));
        let built = tlv()
            .unwrap()
            .with_values([("Tag", Value::Num(h("80"))), ("Value", Value::Num(zeros(0x120)))])
            .unwrap();
        assert_eq!(built.get("Len").unwrap(), h("82 01 20"));
    }

    #[test]
    fn test_round_trip() {
        for literal in ["80 02 00 00", "5F 2D 01 FF", "80 00"] {
            let data = h(literal);
            let parsed = tlv().unwrap().parse(&data).unwrap();
            assert_eq!(parsed.value().unwrap(), data, "round trip of {literal}");
        }
    }

    #[test]
    fn test_ber_round_trip() {
        for literal in ["80 02 00 00", "7F 05 03 80 01 00"] {
            let data = h(literal);
            let parsed = ber_tlv().unwrap().parse(&data).unwrap();
            assert_eq!(parsed.value().unwrap(), data, "round trip of {literal}");
        }
    }

    #[test]
    fn test_tlv_concatenation() {
        let t1 = tlv()
            .unwrap()
            .with_values([("Tag", Value::Num(h("82"))), ("Value", Value::Num(h("10")))])
            .unwrap();
        let t2 = tlv()
            .unwrap()
            .with_values([("Tag", Value::Num(h("83"))), ("Value", Value::Num(h("92")))])
            .unwrap();
        let t3 = tlv()
            .unwrap()
            .with_values([("Tag", Value::Num(h("C0"))), ("Value", Value::Num(h("89")))])
            .unwrap();
        let list = t1.concat(&t2);
        list.push(Value::Table(t3));
        assert_eq!(list.value().unwrap(), h("82 01 10 83 01 92 C0 01 89"));

        let c = tlv()
            .unwrap()
            .with_values([
                ("Tag", Value::Num(h("62"))),
                ("Value", Value::List(list.clone())),
            ])
            .unwrap();
        assert_eq!(c.get("Value").unwrap(), Value::List(list));
        assert_eq!(c.value().unwrap(), h("62 09 82 01 10 83 01 92 C0 01 89"));

        // Dropping the last element re-derives the length on next read.
        if let Value::List(l) = c.get("Value").unwrap() {
            l.pop();
        }
        assert_eq!(c.value().unwrap(), h("62 06 82 01 10 83 01 92"));
    }

    #[test]
    fn test_tl_list_is_a_dol() {
        let m = tl_list().unwrap().matches(&h("5A 02 5F 2D 02")).unwrap();
        assert!(!m.fail);
        let dol = m.value.as_list().unwrap().clone();
        assert_eq!(dol.len(), 2);

        let tlvs = parse_with_dol(&h("11 22 33 44"), &dol).unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].get("Tag").unwrap(), h("5A"));
        assert_eq!(tlvs[0].get("Value").unwrap(), h("11 22"));
        assert_eq!(tlvs[1].get("Tag").unwrap(), h("5F 2D"));
        assert_eq!(tlvs[1].get("Value").unwrap(), h("33 44"));
        assert_eq!(tlvs[0].value().unwrap(), h("5A 02 11 22"));
    }

    #[test]
    fn test_nested_constructed_synthesis() {
        let data = h("7F 05 03 80 01 00");
        let parsed = ber_tlv().unwrap().parse(&data).unwrap();
        // Mutating the nested record propagates to the outer synthesis.
        let inner = find_tag(&parsed, &h("80")).unwrap().unwrap();
        inner.set("Value", h("FF")).unwrap();
        assert_eq!(parsed.value().unwrap(), h("7F 05 03 80 01 FF"));
    }
}
