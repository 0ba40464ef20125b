//! Driver Types
//!
//! 파라미터와 결과 레코드에서 사용하는 값 타입

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};

// ============================================================================
// Value - 그래프 값
// ============================================================================

/// 그래프 값 타입
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer (i64)
    Integer(i64),
    /// Float (f64)
    Float(f64),
    /// String
    String(String),
    /// Bytes
    Bytes(Vec<u8>),
    /// List
    List(Vec<Value>),
    /// Map
    Map(HashMap<String, Value>),
    /// Node
    Node(Node),
    /// Relationship
    Relationship(Relationship),
    /// Date
    Date(NaiveDate),
    /// DateTime
    DateTime(DateTime<FixedOffset>),
    /// LocalDateTime
    LocalDateTime(NaiveDateTime),
}

impl Value {
    /// Null 여부
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean으로 변환
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer로 변환
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Float로 변환
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String으로 변환
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// List로 변환
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Map으로 변환
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Node로 변환
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Relationship으로 변환
    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Value::Relationship(r) => Some(r),
            _ => None,
        }
    }

    /// 타입 이름
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Node(_) => "Node",
            Value::Relationship(_) => "Relationship",
            Value::Date(_) => "Date",
            Value::DateTime(_) => "DateTime",
            Value::LocalDateTime(_) => "LocalDateTime",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(l) => write!(f, "[{} items]", l.len()),
            Value::Map(m) => write!(f, "{{{} entries}}", m.len()),
            Value::Node(n) => write!(f, "{}", n),
            Value::Relationship(r) => write!(f, "{}", r),
            Value::Date(d) => write!(f, "{}", d),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::LocalDateTime(dt) => write!(f, "{}", dt),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTime(v)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

// ============================================================================
// Node - 그래프 노드
// ============================================================================

/// 그래프 노드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// 노드 ID
    pub id: i64,
    /// 레이블
    pub labels: Vec<String>,
    /// 속성
    pub properties: HashMap<String, Value>,
    /// 엘리먼트 ID (Neo4j 5.x)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

impl Node {
    /// 새 노드 생성
    pub fn new(id: i64, labels: Vec<String>, properties: HashMap<String, Value>) -> Self {
        Self {
            id,
            labels,
            properties,
            element_id: None,
        }
    }

    /// 레이블 포함 여부
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// 속성 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// 속성 가져오기 (타입 변환)
    pub fn get_as<T: TryFrom<Value, Error = DriverError>>(&self, key: &str) -> DriverResult<T> {
        self.properties
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::type_conversion(format!("Property '{}' not found", key)))
            .and_then(T::try_from)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = if self.labels.is_empty() {
            String::new()
        } else {
            format!(":{}", self.labels.join(":"))
        };
        write!(f, "({}{})", self.id, labels)
    }
}

// ============================================================================
// Relationship - 그래프 관계
// ============================================================================

/// 그래프 관계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// 관계 ID
    pub id: i64,
    /// 시작 노드 ID
    pub start_node_id: i64,
    /// 끝 노드 ID
    pub end_node_id: i64,
    /// 타입
    #[serde(rename = "type")]
    pub rel_type: String,
    /// 속성
    pub properties: HashMap<String, Value>,
}

impl Relationship {
    /// 새 관계 생성
    pub fn new(
        id: i64,
        start_node_id: i64,
        end_node_id: i64,
        rel_type: impl Into<String>,
        properties: HashMap<String, Value>,
    ) -> Self {
        Self {
            id,
            start_node_id,
            end_node_id,
            rel_type: rel_type.into(),
            properties,
        }
    }

    /// 속성 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({})-[:{}]->({})",
            self.start_node_id, self.rel_type, self.end_node_id
        )
    }
}

// ============================================================================
// TryFrom implementations
// ============================================================================

macro_rules! impl_try_from_value {
    ($target:ty, $name:literal, $($pattern:pat => $out:expr),+ $(,)?) => {
        impl TryFrom<Value> for $target {
            type Error = DriverError;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                match value {
                    $($pattern => Ok($out),)+
                    other => Err(DriverError::type_conversion(format!(
                        "Cannot convert {} to {}",
                        other.type_name(),
                        $name
                    ))),
                }
            }
        }
    };
}

impl_try_from_value!(bool, "bool", Value::Boolean(b) => b);
impl_try_from_value!(i64, "i64", Value::Integer(i) => i);
impl_try_from_value!(f64, "f64", Value::Float(f) => f, Value::Integer(i) => i as f64);
impl_try_from_value!(String, "String", Value::String(s) => s);
impl_try_from_value!(Node, "Node", Value::Node(n) => n);
impl_try_from_value!(Relationship, "Relationship", Value::Relationship(r) => r);
impl_try_from_value!(NaiveDate, "Date", Value::Date(d) => d);

// ============================================================================
// Tests
// ============================================================================
