//! Payment gateway oracle and its implementations.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// Answer of the payment gateway. A decline is a business outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentDecision {
    Approved,
    Declined,
}

/// Trait for charging a user. Implementations do not retry.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, user_id: &str, amount: u64) -> Result<PaymentDecision, SagaError>;
}

/// Demonstration gateway that approves with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomPaymentGateway {
    approval_rate: f64,
}

impl RandomPaymentGateway {
    /// Creates a gateway approving with probability `approval_rate`,
    /// clamped to `[0, 1]`.
    pub fn new(approval_rate: f64) -> Self {
        let approval_rate = if approval_rate.is_nan() {
            0.0
        } else {
            approval_rate.clamp(0.0, 1.0)
        };
        Self { approval_rate }
    }

    pub fn approval_rate(&self) -> f64 {
        self.approval_rate
    }
}

impl Default for RandomPaymentGateway {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[async_trait]
impl PaymentGateway for RandomPaymentGateway {
    async fn charge(&self, user_id: &str, amount: u64) -> Result<PaymentDecision, SagaError> {
        let approved = rand::random::<f64>() < self.approval_rate;
        tracing::debug!(user_id, amount, approved, "Payment gateway decision");
        Ok(if approved {
            PaymentDecision::Approved
        } else {
            PaymentDecision::Declined
        })
    }
}

#[derive(Debug, Default)]
struct ScriptedPaymentState {
    charges: Vec<(String, u64)>,
    decline: bool,
    fail: bool,
}

/// Deterministic payment gateway for tests. Approves unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPaymentGateway {
    state: Arc<RwLock<ScriptedPaymentState>>,
}

impl ScriptedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every charge until switched off again.
    pub fn set_decline(&self, decline: bool) {
        self.write().decline = decline;
    }

    /// Fails every charge with a gateway error until switched off again.
    pub fn set_fail(&self, fail: bool) {
        self.write().fail = fail;
    }

    /// Number of charge attempts, including declined and failed ones.
    pub fn charge_count(&self) -> usize {
        self.read().charges.len()
    }

    /// All charge attempts as `(user_id, amount)`.
    pub fn charges(&self) -> Vec<(String, u64)> {
        self.read().charges.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ScriptedPaymentState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ScriptedPaymentState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PaymentGateway for ScriptedPaymentGateway {
    async fn charge(&self, user_id: &str, amount: u64) -> Result<PaymentDecision, SagaError> {
        let mut state = self.write();
        state.charges.push((user_id.to_string(), amount));

        if state.fail {
            return Err(SagaError::PaymentGateway("gateway unreachable".to_string()));
        }
        Ok(if state.decline {
            PaymentDecision::Declined
        } else {
            PaymentDecision::Approved
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_gateway_outcomes() {
        let gateway = ScriptedPaymentGateway::new();

        assert_eq!(
            gateway.charge("user-1", 40).await.unwrap(),
            PaymentDecision::Approved
        );

        gateway.set_decline(true);
        assert_eq!(
            gateway.charge("user-1", 40).await.unwrap(),
            PaymentDecision::Declined
        );

        gateway.set_fail(true);
        assert!(gateway.charge("user-1", 40).await.is_err());

        assert_eq!(gateway.charge_count(), 3);
        assert_eq!(gateway.charges()[0], ("user-1".to_string(), 40));
    }

    #[tokio::test]
    async fn test_random_gateway_extremes() {
        let always = RandomPaymentGateway::new(1.0);
        let never = RandomPaymentGateway::new(0.0);

        for _ in 0..20 {
            assert_eq!(always.charge("u", 20).await.unwrap(), PaymentDecision::Approved);
            assert_eq!(never.charge("u", 20).await.unwrap(), PaymentDecision::Declined);
        }
    }

    #[test]
    fn test_approval_rate_is_clamped() {
        assert_eq!(RandomPaymentGateway::new(3.0).approval_rate(), 1.0);
        assert_eq!(RandomPaymentGateway::new(-1.0).approval_rate(), 0.0);
        assert_eq!(RandomPaymentGateway::new(f64::NAN).approval_rate(), 0.0);
        assert_eq!(RandomPaymentGateway::default().approval_rate(), 0.5);
    }
}
