use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::{
    db::{DormStore, StoreError},
    dorm::FieldUpdate,
    reading::{ActionType, DecodedReading, decode_line},
};

/// Door readings below this value count as the door being opened.
pub const DOOR_OPEN_THRESHOLD: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Applied(FieldUpdate),
    NoMatchingDorm(FieldUpdate),
    DoorClosed(i64),
    UnknownAction(char),
}

/// Routes decoded readings to field updates on a dorm record.
pub struct Dispatcher {
    store: Arc<dyn DormStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn DormStore>) -> Self {
        Self { store }
    }

    pub fn dispatch(
        &self,
        reading: &DecodedReading,
        dorm_id: &str,
        now: DateTime<Local>,
    ) -> Result<DispatchOutcome, StoreError> {
        let update = match reading.action {
            ActionType::Status => FieldUpdate::Status(reading.value.to_string()),
            ActionType::Humidity => FieldUpdate::Humidity(reading.value as f64),
            ActionType::Temperature => FieldUpdate::Temperature(reading.value as f64),
            ActionType::Door if reading.value < DOOR_OPEN_THRESHOLD => FieldUpdate::DoorOpened(now),
            ActionType::Door => return Ok(DispatchOutcome::DoorClosed(reading.value)),
            ActionType::Other(c) => {
                log::warn!("Unknown data type received: {c}");
                return Ok(DispatchOutcome::UnknownAction(c));
            }
        };

        match self.store.apply(dorm_id, &update)? {
            Some(recorded) => Ok(DispatchOutcome::Applied(recorded)),
            None => {
                log::warn!("No dorm record matches {dorm_id}, dropping {update:?}");
                Ok(DispatchOutcome::NoMatchingDorm(update))
            }
        }
    }

    /// Decodes and dispatches one serial line. Failures are logged and the
    /// line is dropped.
    pub fn handle_line(&self, line: &str, dorm_id: &str) -> Option<DispatchOutcome> {
        let reading = match decode_line(line) {
            Ok(reading) => reading,
            Err(e) => {
                log::error!("Error handling data: {e}");
                return None;
            }
        };

        match self.dispatch(&reading, dorm_id, Local::now()) {
            Ok(outcome) => {
                log::debug!("{line:?} -> {outcome:?}");
                Some(outcome)
            }
            Err(e) => {
                log::error!("Error handling data {line:?}: {e}");
                None
            }
        }
    }
}
