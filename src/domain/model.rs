use serde::{Deserialize, Serialize};
use std::fmt;

/// One exported account row: `teamName,name,loginId,email,password`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub team_name: String,
    pub name: String,
    pub login_id: String,
    pub email: String,
    pub password: String,
}

/// A member row before provisioning. `login_id` and `password` are usually derived, not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub email: String,
    pub login_id: String,
    pub password: String,
    pub univ: String,
    pub role: String,
    pub team_name: Option<String>,
    pub name: Option<String>,
}

impl Member {
    pub fn email_local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or_default()
    }

    pub fn to_credential(&self) -> Credential {
        let name = self
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| Some(self.login_id.clone()).filter(|l| !l.is_empty()))
            .unwrap_or_else(|| self.email_local_part().to_string());

        Credential {
            team_name: self.team_name.clone().unwrap_or_default(),
            name,
            login_id: self.login_id.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Success,
    AlreadyDone,
    Rejected,
    Error,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "OK",
            Outcome::AlreadyDone => "SKIP",
            Outcome::Rejected => "ERR",
            Outcome::Error => "ERR",
        }
    }
}

/// The `data` string of a 200 flag submission response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmitVerdict {
    Correct,
    Submitted,
    Wait,
    Wrong,
    Other(String),
}

impl SubmitVerdict {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Correct" => SubmitVerdict::Correct,
            "Submitted" => SubmitVerdict::Submitted,
            "Wait" => SubmitVerdict::Wait,
            "Wrong" => SubmitVerdict::Wrong,
            other => SubmitVerdict::Other(other.to_string()),
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            SubmitVerdict::Correct => Outcome::Success,
            SubmitVerdict::Submitted => Outcome::AlreadyDone,
            SubmitVerdict::Wait | SubmitVerdict::Wrong => Outcome::Rejected,
            SubmitVerdict::Other(_) => Outcome::Success,
        }
    }
}

impl fmt::Display for SubmitVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitVerdict::Correct => f.write_str("Correct"),
            SubmitVerdict::Submitted => f.write_str("Submitted"),
            SubmitVerdict::Wait => f.write_str("Wait"),
            SubmitVerdict::Wrong => f.write_str("Wrong"),
            SubmitVerdict::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub id: String,
    pub outcome: Outcome,
    pub verdict: Option<SubmitVerdict>,
    pub detail: String,
    pub latency_ms: f64,
}

impl TaskResult {
    pub fn new(id: impl Into<String>, outcome: Outcome, detail: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            id: id.into(),
            outcome,
            verdict: None,
            detail: detail.into(),
            latency_ms,
        }
    }

    pub fn error(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(id, Outcome::Error, detail, 0.0)
    }

    pub fn with_verdict(mut self, verdict: SubmitVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }
}

/// Scenario users as stored in `test_data.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestUser {
    pub login_id: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRef {
    pub id: u64,
    pub flag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestData {
    pub users: Vec<TestUser>,
    pub teams: Vec<String>,
    pub challenge: ChallengeRef,
}
