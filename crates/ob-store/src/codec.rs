//! Versioned encoding of trials and outcomes.
//!
//! Both records are JSON objects carrying an explicit `version` and `kind`,
//! so a worker built from a different codebase can read and write them:
//!
//! ```json
//! {"version":1,"kind":"trial","trial":{"study_name":"s","number":0,"params":{"x":{"kind":"float","value":1.5}}}}
//! {"version":1,"kind":"outcome","trial":{"study_name":"s","number":0},"result":{"state":"complete","values":0.25}}
//! ```

use ob_types::{CodecError, Outcome, Params, Trial, TrialNumber, TrialRef, TrialResult};
use serde::{Deserialize, Serialize};

/// Highest encoding version this build reads and the one it writes.
pub const CODEC_VERSION: u32 = 1;

const TRIAL_KIND: &str = "trial";
const OUTCOME_KIND: &str = "outcome";

/// The part of a trial a worker needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub study_name: String,
    pub number: TrialNumber,
    pub params: Params,
}

impl TrialRecord {
    pub fn trial_ref(&self) -> TrialRef {
        TrialRef {
            study_name: self.study_name.clone(),
            number: self.number,
        }
    }
}

impl From<&Trial> for TrialRecord {
    fn from(trial: &Trial) -> Self {
        Self {
            study_name: trial.study_name.clone(),
            number: trial.number,
            params: trial.params.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    version: u32,
    kind: String,
}

#[derive(Serialize, Deserialize)]
struct TrialEnvelope {
    version: u32,
    kind: String,
    trial: TrialRecord,
}

#[derive(Serialize, Deserialize)]
struct OutcomeEnvelope {
    version: u32,
    kind: String,
    trial: TrialRef,
    result: TrialResult,
}

fn check_header(bytes: &[u8], expected: &str) -> Result<(), CodecError> {
    let header: Header = serde_json::from_slice(bytes)?;
    if header.version == 0 || header.version > CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: header.version,
            supported: CODEC_VERSION,
        });
    }
    if header.kind != expected {
        return Err(CodecError::WrongKind {
            expected: expected.to_string(),
            found: header.kind,
        });
    }
    Ok(())
}

pub fn encode_trial(trial: &Trial) -> Result<Vec<u8>, CodecError> {
    let envelope = TrialEnvelope {
        version: CODEC_VERSION,
        kind: TRIAL_KIND.to_string(),
        trial: TrialRecord::from(trial),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub fn decode_trial(bytes: &[u8]) -> Result<TrialRecord, CodecError> {
    check_header(bytes, TRIAL_KIND)?;
    let envelope: TrialEnvelope = serde_json::from_slice(bytes)?;
    Ok(envelope.trial)
}

pub fn encode_outcome(outcome: &Outcome) -> Result<Vec<u8>, CodecError> {
    let envelope = OutcomeEnvelope {
        version: CODEC_VERSION,
        kind: OUTCOME_KIND.to_string(),
        trial: outcome.trial.clone(),
        result: outcome.result.clone(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub fn decode_outcome(bytes: &[u8]) -> Result<Outcome, CodecError> {
    check_header(bytes, OUTCOME_KIND)?;
    let envelope: OutcomeEnvelope = serde_json::from_slice(bytes)?;
    Ok(Outcome {
        trial: envelope.trial,
        result: envelope.result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_types::{ObjectiveValue, ParameterValue};

    fn sample_trial() -> Trial {
        let mut params = Params::new();
        params.insert("x".into(), ParameterValue::Float(-3.25));
        params.insert("layers".into(), ParameterValue::Int(4));
        params.insert(
            "activation".into(),
            ParameterValue::Categorical(serde_json::json!("relu")),
        );
        Trial::new("example_study", 12, params)
    }

    #[test]
    fn trial_round_trip_preserves_params() {
        let trial = sample_trial();
        let bytes = encode_trial(&trial).unwrap();
        let record = decode_trial(&bytes).unwrap();
        assert_eq!(record, TrialRecord::from(&trial));
        assert_eq!(record.params["layers"], ParameterValue::Int(4));
    }

    #[test]
    fn outcome_round_trips_including_failure() {
        let trial = sample_trial();
        let outcomes = [
            Outcome::complete(trial.trial_ref(), 0.5),
            Outcome::complete(trial.trial_ref(), vec![0.5, 1.5]),
            Outcome::failed(trial.trial_ref(), "exit status 1"),
        ];
        for outcome in outcomes {
            let bytes = encode_outcome(&outcome).unwrap();
            assert_eq!(decode_outcome(&bytes).unwrap(), outcome);
        }
    }

    #[test]
    fn single_and_multi_objective_stay_distinct() {
        let trial = sample_trial();
        let bytes = encode_outcome(&Outcome::complete(trial.trial_ref(), vec![0.5])).unwrap();
        let decoded = decode_outcome(&bytes).unwrap();
        assert_eq!(
            decoded.result.into_values(),
            Some(ObjectiveValue::Multi(vec![0.5]))
        );
    }

    #[test]
    fn kind_is_checked() {
        let bytes = encode_trial(&sample_trial()).unwrap();
        assert!(matches!(
            decode_outcome(&bytes),
            Err(CodecError::WrongKind { .. })
        ));
    }

    #[test]
    fn future_versions_are_rejected() {
        let bytes = br#"{"version":9,"kind":"outcome","trial":{"study_name":"s","number":1},"result":{"state":"failed","reason":"x"}}"#;
        assert!(matches!(
            decode_outcome(bytes),
            Err(CodecError::UnsupportedVersion { found: 9, .. })
        ));
    }

    #[test]
    fn corrupt_bytes_are_an_error() {
        assert!(matches!(decode_outcome(b"\x80\x04pickle"), Err(CodecError::Json(_))));
        assert!(decode_trial(b"{\"version\":1,\"kind\":\"trial\"}").is_err());
    }

    #[test]
    fn sampled_floats_round_trip_bit_for_bit() {
        use ob_optimizer::{RandomSearch, SearchSpace, SearchStrategy};

        let space = SearchSpace::new()
            .add_float("x", -10.0, 10.0)
            .add_log_uniform("lr", 1e-8, 1e3);
        let mut search = RandomSearch::new(space, Some(17));

        for (number, params) in search.suggest(5_000).into_iter().enumerate() {
            let trial = Trial::new("floats", number as TrialNumber, params);
            let record = decode_trial(&encode_trial(&trial).unwrap()).unwrap();
            assert_eq!(record, TrialRecord::from(&trial));

            let x = trial.params["x"].as_f64().unwrap();
            let lr = trial.params["lr"].as_f64().unwrap();
            let outcome = Outcome::complete(trial.trial_ref(), vec![(x - 2.0).powi(2), lr.ln()]);
            let decoded = decode_outcome(&encode_outcome(&outcome).unwrap()).unwrap();
            let (sent, received) = (outcome.result.values(), decoded.result.values());
            for (a, b) in sent.unwrap().values().iter().zip(received.unwrap().values()) {
                assert_eq!(a.to_bits(), b.to_bits(), "trial {number}: {a} came back as {b}");
            }
        }
    }

    #[test]
    fn external_worker_output_decodes() {
        let bytes = br#"{"version":1,"kind":"outcome","trial":{"study_name":"s","number":0},"result":{"state":"complete","values":0.25}}"#;
        let outcome = decode_outcome(bytes).unwrap();
        assert_eq!(outcome.trial.number, 0);
        assert_eq!(outcome.result.into_values(), Some(ObjectiveValue::Single(0.25)));
    }
}
