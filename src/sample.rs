//! Sample Workload
//!
//! 허브-디바이스-인터페이스 토폴로지를 만드는 쓰기 스크립트와 조회 쿼리.

use uuid::Uuid;

use crate::driver::{Query, Value};

/// 디바이스 전체 조회 쿼리
pub const ALL_DEVICES: &str = "MATCH (n:Device) RETURN n";

/// 허브 하나에 `device_count`개의 디바이스를 만들고, 디바이스마다
/// `interface_count`개의 인터페이스를 `InterfaceHub`를 거쳐 허브에 연결한다.
///
/// 모든 id 파라미터는 새 v4 UUID다. 이름은 `device{i}`, `interface{j}`.
pub fn device_graph(device_count: usize, interface_count: usize) -> Query {
    let mut text = String::from("create (h:Hub {hub_id: $hub_id})\n with h ");
    let mut query = Query::new(String::new()).with_param("hub_id", new_id());

    for i in 0..device_count {
        if i > 0 {
            text.push_str("with h\n");
        }
        text.push_str(&format!(
            "create (d{i}:Device {{device_id: $device{i}_id, name: $device{i}_name}})\n with * \n"
        ));
        query = query
            .with_param(format!("device{i}_id"), new_id())
            .with_param(format!("device{i}_name"), format!("device{i}"));

        for j in 0..interface_count {
            text.push_str(&format!(
                "create(d{i})-[:IF]->(:Interface {{interface_id: $interface{i}{j}_id, \
                 name: $interface{i}{j}_name}})-[:CONN]->(:InterfaceHub)<-[:IFH]-(h)\n"
            ));
            query = query
                .with_param(format!("interface{i}{j}_id"), new_id())
                .with_param(format!("interface{i}{j}_name"), format!("interface{j}"));
        }
    }

    query.text = text;
    query
}

/// 디바이스 전체 조회
pub fn all_devices() -> Query {
    Query::new(ALL_DEVICES)
}

fn new_id() -> Value {
    Value::String(Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_device_graph_parameters() {
        let query = device_graph(2, 3);

        // hub + 장치마다 (id, name) + 인터페이스마다 (id, name)
        assert_eq!(query.parameters.len(), 1 + 2 * 2 + 2 * 3 * 2);
        assert_eq!(query.parameters.get("device1_name"), Some(&Value::from("device1")));
        assert_eq!(query.parameters.get("interface12_name"), Some(&Value::from("interface2")));

        let ids: HashSet<&str> = query
            .parameters
            .iter()
            .filter(|(k, _)| k.ends_with("_id"))
            .filter_map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(ids.len(), 1 + 2 + 6);
        assert!(ids.iter().all(|id| Uuid::parse_str(id).is_ok()));
    }

    #[test]
    fn test_device_graph_text() {
        let query = device_graph(2, 1);

        assert!(query.text.starts_with("create (h:Hub {hub_id: $hub_id})"));
        assert_eq!(query.text.matches(":Device").count(), 2);
        assert_eq!(query.text.matches(":Interface ").count(), 2);
        assert_eq!(query.text.matches("with h\n").count(), 1);
        assert!(query.text.contains("$interface10_id"));
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_device_graph_fresh_ids() {
        let a = device_graph(1, 0);
        let b = device_graph(1, 0);
        assert_ne!(a.parameters.get("hub_id"), b.parameters.get("hub_id"));
        assert_eq!(all_devices().text, ALL_DEVICES);
    }
}
