//! Connector state

use fleetsim_messages::ChargePointStatus;
use serde::{Deserialize, Serialize};

/// A physical plug on the charger, indexed 1..N
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: u32,
    pub status: ChargePointStatus,
}

impl Connector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            status: ChargePointStatus::Available,
        }
    }

    pub fn set_status(&mut self, status: ChargePointStatus) {
        self.status = status;
    }

    pub fn is_available(&self) -> bool {
        self.status == ChargePointStatus::Available
    }

    /// A transaction currently occupies this connector
    pub fn is_in_transaction(&self) -> bool {
        matches!(
            self.status,
            ChargePointStatus::Charging
                | ChargePointStatus::SuspendedEvse
                | ChargePointStatus::SuspendedEv
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connector_is_available() {
        let connector = Connector::new(1);
        assert_eq!(connector.id, 1);
        assert!(connector.is_available());
        assert!(!connector.is_in_transaction());
    }

    #[test]
    fn test_transaction_states() {
        let mut connector = Connector::new(1);
        connector.set_status(ChargePointStatus::Charging);
        assert!(connector.is_in_transaction());
        assert!(!connector.is_available());

        connector.set_status(ChargePointStatus::SuspendedEv);
        assert!(connector.is_in_transaction());

        connector.set_status(ChargePointStatus::Finishing);
        assert!(!connector.is_in_transaction());
    }
}
