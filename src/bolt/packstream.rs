//! PackStream
//!
//! Bolt 값 직렬화. 그래프/시간 구조체는 [`Value`]로 바로 변환된다.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime};

use crate::driver::{DriverError, DriverResult, Node, Relationship, Value};

// ============================================================================
// Markers
// ============================================================================

const NULL: u8 = 0xC0;
const FLOAT_64: u8 = 0xC1;
const FALSE: u8 = 0xC2;
const TRUE: u8 = 0xC3;
const INT_8: u8 = 0xC8;
const INT_16: u8 = 0xC9;
const INT_32: u8 = 0xCA;
const INT_64: u8 = 0xCB;
const BYTES_8: u8 = 0xCC;
const BYTES_16: u8 = 0xCD;
const BYTES_32: u8 = 0xCE;
const TINY_STRING: u8 = 0x80;
const STRING_8: u8 = 0xD0;
const STRING_16: u8 = 0xD1;
const STRING_32: u8 = 0xD2;
const TINY_LIST: u8 = 0x90;
const LIST_8: u8 = 0xD4;
const LIST_16: u8 = 0xD5;
const LIST_32: u8 = 0xD6;
const TINY_MAP: u8 = 0xA0;
const MAP_8: u8 = 0xD8;
const MAP_16: u8 = 0xD9;
const MAP_32: u8 = 0xDA;
const TINY_STRUCT: u8 = 0xB0;

/// 구조체 태그
pub(crate) mod tag {
    pub const NODE: u8 = b'N';
    pub const RELATIONSHIP: u8 = b'R';
    pub const UNBOUND_RELATIONSHIP: u8 = b'r';
    pub const PATH: u8 = b'P';
    pub const DATE: u8 = b'D';
    pub const TIME: u8 = b'T';
    pub const LOCAL_TIME: u8 = b't';
    /// Bolt 5 UTC 기준 DateTime
    pub const DATE_TIME_UTC: u8 = b'I';
    /// Bolt 4 로컬 초 기준 DateTime
    pub const DATE_TIME_LEGACY: u8 = b'F';
    pub const DATE_TIME_ZONE_ID_UTC: u8 = b'i';
    pub const DATE_TIME_ZONE_ID_LEGACY: u8 = b'f';
    pub const LOCAL_DATE_TIME: u8 = b'd';
    pub const DURATION: u8 = b'E';
    pub const POINT_2D: u8 = b'X';
    pub const POINT_3D: u8 = b'Y';
}

/// 0001-01-01부터 1970-01-01까지의 일수
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

// ============================================================================
// Encoder
// ============================================================================

/// PackStream 인코더
pub struct Encoder<'a> {
    buf: &'a mut BytesMut,
    /// Bolt 5 이상이면 DateTime을 UTC 초로 보낸다
    utc_datetime: bool,
}

impl<'a> Encoder<'a> {
    /// 버퍼에 쓰는 인코더 생성
    pub fn new(buf: &'a mut BytesMut, utc_datetime: bool) -> Self {
        Self { buf, utc_datetime }
    }

    /// 구조체 헤더
    pub fn struct_header(&mut self, fields: u8, signature: u8) {
        self.buf.put_u8(TINY_STRUCT | (fields & 0x0F));
        self.buf.put_u8(signature);
    }

    /// 값 하나 인코딩
    pub fn value(&mut self, value: &Value) -> DriverResult<()> {
        match value {
            Value::Null => self.buf.put_u8(NULL),
            Value::Boolean(b) => self.buf.put_u8(if *b { TRUE } else { FALSE }),
            Value::Integer(i) => self.int(*i),
            Value::Float(f) => {
                self.buf.put_u8(FLOAT_64);
                self.buf.put_f64(*f);
            }
            Value::String(s) => self.string(s)?,
            Value::Bytes(b) => {
                self.sized(b.len(), None, [BYTES_8, BYTES_16, BYTES_32])?;
                self.buf.put_slice(b);
            }
            Value::List(items) => {
                self.sized(items.len(), Some(TINY_LIST), [LIST_8, LIST_16, LIST_32])?;
                for item in items {
                    self.value(item)?;
                }
            }
            Value::Map(map) => self.map(map)?,
            // 그래프 엔티티는 파라미터로 보낼 수 없으므로 속성 맵으로 보낸다
            Value::Node(node) => self.map(&node.properties)?,
            Value::Relationship(rel) => self.map(&rel.properties)?,
            Value::Date(date) => {
                self.struct_header(1, tag::DATE);
                self.int(i64::from(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE));
            }
            Value::DateTime(dt) => {
                let offset = i64::from(dt.offset().local_minus_utc());
                let (tag, seconds) = if self.utc_datetime {
                    (tag::DATE_TIME_UTC, dt.timestamp())
                } else {
                    (tag::DATE_TIME_LEGACY, dt.timestamp() + offset)
                };
                self.struct_header(3, tag);
                self.int(seconds);
                self.int(i64::from(dt.timestamp_subsec_nanos()));
                self.int(offset);
            }
            Value::LocalDateTime(dt) => {
                let utc = dt.and_utc();
                self.struct_header(2, tag::LOCAL_DATE_TIME);
                self.int(utc.timestamp());
                self.int(i64::from(utc.timestamp_subsec_nanos()));
            }
        }
        Ok(())
    }

    /// 문자열 인코딩
    pub fn string(&mut self, s: &str) -> DriverResult<()> {
        self.sized(s.len(), Some(TINY_STRING), [STRING_8, STRING_16, STRING_32])?;
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// 맵 인코딩
    pub fn map(&mut self, map: &HashMap<String, Value>) -> DriverResult<()> {
        self.sized(map.len(), Some(TINY_MAP), [MAP_8, MAP_16, MAP_32])?;
        for (key, value) in map {
            self.string(key)?;
            self.value(value)?;
        }
        Ok(())
    }

    fn int(&mut self, i: i64) {
        if (-16..=127).contains(&i) {
            self.buf.put_i8(i as i8);
        } else if i8::try_from(i).is_ok() {
            self.buf.put_u8(INT_8);
            self.buf.put_i8(i as i8);
        } else if i16::try_from(i).is_ok() {
            self.buf.put_u8(INT_16);
            self.buf.put_i16(i as i16);
        } else if i32::try_from(i).is_ok() {
            self.buf.put_u8(INT_32);
            self.buf.put_i32(i as i32);
        } else {
            self.buf.put_u8(INT_64);
            self.buf.put_i64(i);
        }
    }

    fn sized(&mut self, len: usize, tiny: Option<u8>, markers: [u8; 3]) -> DriverResult<()> {
        match (tiny, len) {
            (Some(base), 0..=15) => self.buf.put_u8(base | len as u8),
            (_, l) if l <= u8::MAX as usize => {
                self.buf.put_u8(markers[0]);
                self.buf.put_u8(l as u8);
            }
            (_, l) if l <= u16::MAX as usize => {
                self.buf.put_u8(markers[1]);
                self.buf.put_u16(l as u16);
            }
            (_, l) if l <= u32::MAX as usize => {
                self.buf.put_u8(markers[2]);
                self.buf.put_u32(l as u32);
            }
            (_, l) => {
                return Err(DriverError::protocol(format!("Value too large to pack: {}", l)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// PackStream 디코더
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// 바이트 슬라이스 디코더 생성
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// 남은 바이트 수
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    /// 구조체 헤더 읽기: (필드 수, 시그니처)
    pub fn struct_header(&mut self) -> DriverResult<(usize, u8)> {
        let marker = self.u8()?;
        if marker & 0xF0 != TINY_STRUCT {
            return Err(DriverError::protocol(format!(
                "Expected structure, found marker 0x{:02X}",
                marker
            )));
        }
        Ok(((marker & 0x0F) as usize, self.u8()?))
    }

    /// 값 하나 디코딩
    pub fn value(&mut self) -> DriverResult<Value> {
        let marker = self.u8()?;
        match marker {
            0x00..=0x7F => Ok(Value::Integer(i64::from(marker))),
            0xF0..=0xFF => Ok(Value::Integer(i64::from(marker as i8))),
            0x80..=0x8F => self.string(usize::from(marker & 0x0F)),
            0x90..=0x9F => self.list(usize::from(marker & 0x0F)),
            0xA0..=0xAF => self.map(usize::from(marker & 0x0F)),
            0xB0..=0xBF => {
                let signature = self.u8()?;
                self.structure(usize::from(marker & 0x0F), signature)
            }
            NULL => Ok(Value::Null),
            TRUE => Ok(Value::Boolean(true)),
            FALSE => Ok(Value::Boolean(false)),
            FLOAT_64 => {
                self.need(8)?;
                Ok(Value::Float(self.data.get_f64()))
            }
            INT_8 => {
                self.need(1)?;
                Ok(Value::Integer(i64::from(self.data.get_i8())))
            }
            INT_16 => {
                self.need(2)?;
                Ok(Value::Integer(i64::from(self.data.get_i16())))
            }
            INT_32 => {
                self.need(4)?;
                Ok(Value::Integer(i64::from(self.data.get_i32())))
            }
            INT_64 => {
                self.need(8)?;
                Ok(Value::Integer(self.data.get_i64()))
            }
            BYTES_8 | BYTES_16 | BYTES_32 => {
                let len = self.length(marker - BYTES_8)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            STRING_8 | STRING_16 | STRING_32 => {
                let len = self.length(marker - STRING_8)?;
                self.string(len)
            }
            LIST_8 | LIST_16 | LIST_32 => {
                let len = self.length(marker - LIST_8)?;
                self.list(len)
            }
            MAP_8 | MAP_16 | MAP_32 => {
                let len = self.length(marker - MAP_8)?;
                self.map(len)
            }
            other => Err(DriverError::protocol(format!("Unknown marker 0x{:02X}", other))),
        }
    }

    /// 메시지 필드로 쓰이는 맵 읽기
    pub fn metadata(&mut self) -> DriverResult<HashMap<String, Value>> {
        match self.value()? {
            Value::Map(map) => Ok(map),
            other => Err(DriverError::protocol(format!(
                "Expected map, found {}",
                other.type_name()
            ))),
        }
    }

    fn structure(&mut self, fields: usize, signature: u8) -> DriverResult<Value> {
        let values = (0..fields)
            .map(|_| self.value())
            .collect::<DriverResult<Vec<_>>>()?;
        structure_to_value(signature, values)
    }

    fn string(&mut self, len: usize) -> DriverResult<Value> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| DriverError::protocol(format!("Invalid UTF-8 string: {}", e)))
    }

    fn list(&mut self, len: usize) -> DriverResult<Value> {
        let items = (0..len)
            .map(|_| self.value())
            .collect::<DriverResult<Vec<_>>>()?;
        Ok(Value::List(items))
    }

    fn map(&mut self, len: usize) -> DriverResult<Value> {
        let mut map = HashMap::with_capacity(len);
        for _ in 0..len {
            let key = match self.value()? {
                Value::String(s) => s,
                other => {
                    return Err(DriverError::protocol(format!(
                        "Map key must be a string, found {}",
                        other.type_name()
                    )))
                }
            };
            map.insert(key, self.value()?);
        }
        Ok(Value::Map(map))
    }

    /// 8/16/32비트 길이 (`width` 0, 1, 2)
    fn length(&mut self, width: u8) -> DriverResult<usize> {
        match width {
            0 => {
                self.need(1)?;
                Ok(usize::from(self.data.get_u8()))
            }
            1 => {
                self.need(2)?;
                Ok(usize::from(self.data.get_u16()))
            }
            _ => {
                self.need(4)?;
                Ok(self.data.get_u32() as usize)
            }
        }
    }

    fn u8(&mut self) -> DriverResult<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    fn take(&mut self, len: usize) -> DriverResult<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn need(&self, len: usize) -> DriverResult<()> {
        if self.data.len() < len {
            return Err(DriverError::protocol(format!(
                "Unexpected end of message: need {} bytes, have {}",
                len,
                self.data.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Structures
// ============================================================================

fn structure_to_value(signature: u8, fields: Vec<Value>) -> DriverResult<Value> {
    let mut fields = Fields::new(signature, fields);
    let value = match signature {
        tag::NODE => {
            let id = fields.int()?;
            let labels = fields.strings()?;
            let properties = fields.map()?;
            let mut node = Node::new(id, labels, properties);
            node.element_id = fields.optional_string();
            Value::Node(node)
        }
        tag::RELATIONSHIP => {
            let id = fields.int()?;
            let start = fields.int()?;
            let end = fields.int()?;
            let rel_type = fields.string()?;
            let properties = fields.map()?;
            Value::Relationship(Relationship::new(id, start, end, rel_type, properties))
        }
        tag::UNBOUND_RELATIONSHIP => {
            let id = fields.int()?;
            let rel_type = fields.string()?;
            let properties = fields.map()?;
            Value::Relationship(Relationship::new(id, -1, -1, rel_type, properties))
        }
        tag::PATH => {
            let nodes = fields.list()?;
            let rels = fields.list()?;
            let indices = fields.list()?;
            path_to_value(nodes, rels, indices)
        }
        tag::DATE => {
            let days = fields.int()?;
            let date = i32::try_from(days)
                .ok()
                .and_then(|d| d.checked_add(UNIX_EPOCH_DAYS_FROM_CE))
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .ok_or_else(|| fields.invalid())?;
            Value::Date(date)
        }
        tag::DATE_TIME_UTC | tag::DATE_TIME_LEGACY => {
            let seconds = fields.int()?;
            let nanos = fields.int()?;
            let offset = fields.int()?;
            let utc_seconds = if signature == tag::DATE_TIME_UTC {
                seconds
            } else {
                seconds - offset
            };
            let tz = i32::try_from(offset)
                .ok()
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| fields.invalid())?;
            let dt = u32::try_from(nanos)
                .ok()
                .and_then(|n| DateTime::from_timestamp(utc_seconds, n))
                .ok_or_else(|| fields.invalid())?;
            Value::DateTime(dt.with_timezone(&tz))
        }
        tag::LOCAL_DATE_TIME => {
            let seconds = fields.int()?;
            let nanos = fields.int()?;
            let dt: NaiveDateTime = u32::try_from(nanos)
                .ok()
                .and_then(|n| DateTime::from_timestamp(seconds, n))
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| fields.invalid())?;
            Value::LocalDateTime(dt)
        }
        tag::TIME
        | tag::LOCAL_TIME
        | tag::DATE_TIME_ZONE_ID_UTC
        | tag::DATE_TIME_ZONE_ID_LEGACY
        | tag::DURATION
        | tag::POINT_2D
        | tag::POINT_3D => fields.into_tagged_map(),
        other => {
            return Err(DriverError::protocol(format!(
                "Unknown structure signature 0x{:02X}",
                other
            )))
        }
    };
    Ok(value)
}

/// 경로는 노드와 관계를 번갈아 담은 리스트로 펼친다
fn path_to_value(nodes: Vec<Value>, rels: Vec<Value>, indices: Vec<Value>) -> Value {
    let mut out = Vec::with_capacity(indices.len() + 1);
    if let Some(first) = nodes.first() {
        out.push(first.clone());
    }
    for pair in indices.chunks(2) {
        let (Some(rel), Some(node)) = (pair.first(), pair.get(1)) else {
            break;
        };
        let rel_index = rel.as_int().unwrap_or(0);
        let rel_pos = usize::try_from(rel_index.unsigned_abs()).unwrap_or(0);
        if let Some(r) = rel_pos.checked_sub(1).and_then(|i| rels.get(i)) {
            out.push(r.clone());
        }
        if let Some(n) = node.as_int().and_then(|i| usize::try_from(i).ok()).and_then(|i| nodes.get(i)) {
            out.push(n.clone());
        }
    }
    Value::List(out)
}

/// 구조체 필드 읽기 도우미
struct Fields {
    signature: u8,
    iter: std::vec::IntoIter<Value>,
    original_len: usize,
}

impl Fields {
    fn new(signature: u8, fields: Vec<Value>) -> Self {
        Self {
            signature,
            original_len: fields.len(),
            iter: fields.into_iter(),
        }
    }

    fn invalid(&self) -> DriverError {
        DriverError::protocol(format!(
            "Invalid structure 0x{:02X} with {} fields",
            self.signature, self.original_len
        ))
    }

    fn next(&mut self) -> DriverResult<Value> {
        self.iter.next().ok_or_else(|| self.invalid())
    }

    fn int(&mut self) -> DriverResult<i64> {
        match self.next()? {
            Value::Integer(i) => Ok(i),
            _ => Err(self.invalid()),
        }
    }

    fn string(&mut self) -> DriverResult<String> {
        match self.next()? {
            Value::String(s) => Ok(s),
            _ => Err(self.invalid()),
        }
    }

    fn optional_string(&mut self) -> Option<String> {
        match self.iter.next() {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    fn list(&mut self) -> DriverResult<Vec<Value>> {
        match self.next()? {
            Value::List(items) => Ok(items),
            _ => Err(self.invalid()),
        }
    }

    fn strings(&mut self) -> DriverResult<Vec<String>> {
        self.list()?
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(self.invalid()),
            })
            .collect()
    }

    fn map(&mut self) -> DriverResult<HashMap<String, Value>> {
        match self.next()? {
            Value::Map(map) => Ok(map),
            _ => Err(self.invalid()),
        }
    }

    /// 값 모델에 없는 구조체는 `{"tag": .., "fields": [..]}` 맵으로 남긴다
    fn into_tagged_map(self) -> Value {
        let mut map = HashMap::new();
        map.insert(
            "tag".to_string(),
            Value::String(char::from(self.signature).to_string()),
        );
        map.insert("fields".to_string(), Value::List(self.iter.collect()));
        Value::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, utc: bool) -> BytesMut {
        let mut buf = BytesMut::new();
        Encoder::new(&mut buf, utc).value(value).unwrap();
        buf
    }

    fn decode(bytes: &[u8]) -> Value {
        Decoder::new(bytes).value().unwrap()
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(&encode(&Value::Integer(1), false)[..], &[0x01]);
        assert_eq!(&encode(&Value::Integer(-16), false)[..], &[0xF0]);
        assert_eq!(&encode(&Value::Integer(-17), false)[..], &[INT_8, 0xEF]);
        assert_eq!(&encode(&Value::Integer(1000), false)[..], &[INT_16, 0x03, 0xE8]);
        assert_eq!(encode(&Value::Integer(i64::MAX), false)[0], INT_64);

        for i in [0, -1, -16, -17, 127, 128, -129, 40_000, -3_000_000_000, i64::MIN] {
            assert_eq!(decode(&encode(&Value::Integer(i), false)), Value::Integer(i));
        }
    }

    #[test]
    fn test_strings_lists_maps() {
        assert_eq!(&encode(&Value::from("abc"), false)[..], &[0x83, b'a', b'b', b'c']);

        let long = "x".repeat(300);
        let packed = encode(&Value::from(long.as_str()), false);
        assert_eq!(&packed[..3], &[STRING_16, 0x01, 0x2C]);
        assert_eq!(decode(&packed), Value::from(long));

        let list = Value::List(vec![Value::Null, Value::Boolean(true), Value::Float(1.5)]);
        assert_eq!(encode(&list, false)[0], 0x93);
        assert_eq!(decode(&encode(&list, false)), list);

        let mut map = HashMap::new();
        map.insert("hub_id".to_string(), Value::from("h-1"));
        let map = Value::Map(map);
        assert_eq!(decode(&encode(&map, false)), map);
    }

    #[test]
    fn test_decode_node_bolt4_and_bolt5() {
        // B3 'N' id=1 labels=["Device"] props={}
        let bolt4 = [0xB3, b'N', 0x01, 0x91, 0x86, b'D', b'e', b'v', b'i', b'c', b'e', 0xA0];
        let Value::Node(node) = decode(&bolt4) else {
            panic!("expected node");
        };
        assert_eq!(node.id, 1);
        assert!(node.has_label("Device"));
        assert!(node.element_id.is_none());

        let bolt5 = [0xB4, b'N', 0x01, 0x90, 0xA0, 0x83, b'4', b':', b'1'];
        let Value::Node(node) = decode(&bolt5) else {
            panic!("expected node");
        };
        assert_eq!(node.element_id.as_deref(), Some("4:1"));
    }

    #[test]
    fn test_decode_relationship() {
        // B5 'R' id=7 start=1 end=2 type="IF" props={}
        let bytes = [0xB5, b'R', 0x07, 0x01, 0x02, 0x82, b'I', b'F', 0xA0];
        let Value::Relationship(rel) = decode(&bytes) else {
            panic!("expected relationship");
        };
        assert_eq!((rel.id, rel.start_node_id, rel.end_node_id), (7, 1, 2));
        assert_eq!(rel.rel_type, "IF");
    }

    #[test]
    fn test_temporal_values() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(decode(&encode(&Value::Date(date), false)), Value::Date(date));

        let dt = DateTime::parse_from_rfc3339("2024-03-01T10:20:30.5+09:00").unwrap();
        assert_eq!(decode(&encode(&Value::DateTime(dt), true)), Value::DateTime(dt));
        assert_eq!(decode(&encode(&Value::DateTime(dt), false)), Value::DateTime(dt));
        assert_eq!(encode(&Value::DateTime(dt), true)[1], tag::DATE_TIME_UTC);
        assert_eq!(encode(&Value::DateTime(dt), false)[1], tag::DATE_TIME_LEGACY);

        let local = dt.naive_local();
        assert_eq!(
            decode(&encode(&Value::LocalDateTime(local), false)),
            Value::LocalDateTime(local)
        );
    }

    #[test]
    fn test_unmodelled_structure_becomes_tagged_map() {
        // B3 'X' srid=7203 x=1.0 y=2.0
        let mut bytes = vec![0xB3, b'X', INT_16, 0x1C, 0x23, FLOAT_64];
        bytes.extend_from_slice(&1.0f64.to_be_bytes());
        bytes.push(FLOAT_64);
        bytes.extend_from_slice(&2.0f64.to_be_bytes());

        let value = decode(&bytes);
        let map = value.as_map().unwrap();
        assert_eq!(map.get("tag"), Some(&Value::from("X")));
        assert_eq!(map.get("fields").and_then(|f| f.as_list()).map(|f| f.len()), Some(3));
    }

    #[test]
    fn test_truncated_input_is_protocol_error() {
        let err = Decoder::new(&[STRING_8, 0x05, b'a']).value().unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
        assert!(Decoder::new(&[0xC7]).value().is_err());
    }
}
