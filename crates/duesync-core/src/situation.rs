/// The three disjoint DUE situation partitions.
///
/// Loaded from configuration rather than hard-coded: the exact set of
/// situation strings per partition is a deployment concern.
#[derive(Debug, Clone)]
pub struct SituationPartitions {
    cancelled: Vec<String>,
    pending: Vec<String>,
    settled: Vec<String>,
}

/// Which partition a situation string belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Cancelled,
    Pending,
    Settled,
    /// Not recognized by any configured partition; callers should treat this
    /// conservatively (spec gives no refresh guarantee for unknown situations).
    Unknown,
}

impl SituationPartitions {
    pub fn new(cancelled: Vec<String>, pending: Vec<String>, settled: Vec<String>) -> Self {
        Self {
            cancelled: cancelled.into_iter().map(|s| s.to_uppercase()).collect(),
            pending: pending.into_iter().map(|s| s.to_uppercase()).collect(),
            settled: settled.into_iter().map(|s| s.to_uppercase()).collect(),
        }
    }

    pub fn classify(&self, situation: &str) -> Partition {
        let situation = situation.to_uppercase();
        if self.cancelled.iter().any(|s| s == &situation) {
            Partition::Cancelled
        } else if self.pending.iter().any(|s| s == &situation) {
            Partition::Pending
        } else if self.settled.iter().any(|s| s == &situation) {
            Partition::Settled
        } else {
            Partition::Unknown
        }
    }

    pub fn is_cancelled(&self, situation: &str) -> bool {
        self.classify(situation) == Partition::Cancelled
    }

    pub fn cancelled_values(&self) -> &[String] {
        &self.cancelled
    }

    pub fn pending_values(&self) -> &[String] {
        &self.pending
    }

    pub fn settled_values(&self) -> &[String] {
        &self.settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitions() -> SituationPartitions {
        SituationPartitions::new(
            vec!["CANCELADA".into()],
            vec!["ANALISE".into(), "RETIFICACAO".into()],
            vec!["AVERBADA".into(), "DESEMBARACADA".into()],
        )
    }

    #[test]
    fn classifies_each_configured_situation() {
        let p = partitions();
        assert_eq!(p.classify("CANCELADA"), Partition::Cancelled);
        assert_eq!(p.classify("analise"), Partition::Pending);
        assert_eq!(p.classify("Averbada"), Partition::Settled);
        assert_eq!(p.classify("whatever"), Partition::Unknown);
    }

    #[test]
    fn is_cancelled_is_case_insensitive() {
        let p = partitions();
        assert!(p.is_cancelled("cancelada"));
        assert!(!p.is_cancelled("averbada"));
    }
}
