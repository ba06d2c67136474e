use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Current sensor state and occupancy metadata of one dormitory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DormRecord {
    pub dorm_id: String,
    pub dorm_name: String,
    pub temperature: f64,
    pub humidity: f64,
    pub members: Vec<String>,
    pub status: String,
    pub door_last_opened: Option<DateTime<Local>>,
    pub door_opened_times: Vec<DateTime<Local>>,
    pub description: String,
}

/// Body of `POST /dorms`. The door history always starts empty.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDorm {
    pub dorm_id: String,
    pub dorm_name: String,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default)]
    pub members: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub description: String,
}

impl From<NewDorm> for DormRecord {
    fn from(new: NewDorm) -> Self {
        Self {
            dorm_id: new.dorm_id,
            dorm_name: new.dorm_name,
            temperature: new.temperature,
            humidity: new.humidity,
            members: new.members,
            status: new.status,
            door_last_opened: None,
            door_opened_times: Vec::new(),
            description: new.description,
        }
    }
}

/// A single targeted mutation of a dorm record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Status(String),
    Humidity(f64),
    Temperature(f64),
    /// Appends to `door_opened_times` and sets `door_last_opened`.
    DoorOpened(DateTime<Local>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DormRecord {
        DormRecord {
            dorm_id: "ABC123".to_string(),
            dorm_name: "North Hall".to_string(),
            temperature: 20.0,
            humidity: 40.0,
            members: vec!["alice".to_string()],
            status: "ok".to_string(),
            door_last_opened: None,
            door_opened_times: Vec::new(),
            description: String::new(),
        }
    }

    #[test]
    fn test_serializes_with_camel_case_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["dormId"], "ABC123");
        assert_eq!(json["dormName"], "North Hall");
        assert!(json["doorLastOpened"].is_null());
        assert_eq!(json["doorOpenedTimes"], serde_json::json!([]));
    }

    #[test]
    fn test_new_dorm_defaults() {
        let new: NewDorm = serde_json::from_value(serde_json::json!({
            "dormId": "X1",
            "dormName": "West",
            "temperature": 21.5,
            "humidity": 35,
            "status": "ok"
        }))
        .unwrap();
        let record = DormRecord::from(new);
        assert!(record.members.is_empty());
        assert!(record.door_opened_times.is_empty());
        assert_eq!(record.description, "");
    }
}
