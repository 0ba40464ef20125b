//! Record - 결과 레코드
//!
//! 실행기가 메모리로 수집한 결과 행

use std::collections::HashMap;
use std::fmt;

use super::error::{DriverError, DriverResult};
use super::types::{Node, Relationship, Value};

/// 쿼리 결과 레코드
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 컬럼 키
    keys: Vec<String>,
    /// 값들
    values: Vec<Value>,
    /// 키-인덱스 매핑
    key_index: HashMap<String, usize>,
}

impl Record {
    /// 새 레코드 생성
    pub fn new(keys: Vec<String>, values: Vec<Value>) -> Self {
        let key_index = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();

        Self {
            keys,
            values,
            key_index,
        }
    }

    /// (키, 값) 쌍에서 생성
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let (keys, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self::new(keys, values)
    }

    /// 키 목록
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 값 목록
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// 레코드 길이
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 빈 레코드 여부
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 키로 값 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.key_index.get(key).and_then(|&i| self.values.get(i))
    }

    /// 키로 타입 변환된 값 가져오기
    pub fn get_as<T>(&self, key: &str) -> DriverResult<T>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        self.get(key)
            .cloned()
            .ok_or_else(|| DriverError::type_conversion(format!("Key '{}' not found", key)))
            .and_then(T::try_from)
    }

    /// Integer 값 가져오기
    pub fn get_int(&self, key: &str) -> DriverResult<i64> {
        self.get_as::<i64>(key)
    }

    /// String 값 가져오기
    pub fn get_string(&self, key: &str) -> DriverResult<String> {
        self.get_as::<String>(key)
    }

    /// Node 값 가져오기
    pub fn get_node(&self, key: &str) -> DriverResult<Node> {
        self.get_as::<Node>(key)
    }

    /// Relationship 값 가져오기
    pub fn get_relationship(&self, key: &str) -> DriverResult<Relationship> {
        self.get_as::<Relationship>(key)
    }

    /// Map으로 변환
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::iter::Zip<std::slice::Iter<'a, String>, std::slice::Iter<'a, Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter().zip(self.values.iter())
    }
}
