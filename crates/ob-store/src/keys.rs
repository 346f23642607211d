use ob_types::TrialNumber;

/// Deterministic object names for one study.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    study_name: String,
}

impl StoreKeys {
    pub fn new(study_name: impl Into<String>) -> Self {
        Self {
            study_name: study_name.into(),
        }
    }

    pub fn study_name(&self) -> &str {
        &self.study_name
    }

    /// Where the encoded trial parameters are written before dispatch.
    pub fn trial(&self, number: TrialNumber) -> String {
        format!("{}/trial_{number}.bin", self.study_name)
    }

    /// Where the remote worker writes the encoded outcome.
    pub fn outcome(&self, number: TrialNumber) -> String {
        format!("{}/trial_result_{number}.bin", self.study_name)
    }

    /// Study history backup.
    pub fn checkpoint(&self) -> String {
        format!("{}/trials.bin", self.study_name)
    }
}
