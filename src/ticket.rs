//! Jira ticket creation from a JSON file.
//!
//! The file holds an array of `{title, description, steps?, labels?}`. Each
//! entry becomes one issue through the REST v2 API with basic auth.
//! Connection settings come from CLI flags, then `[jira]` in the config,
//! then `JIRA_TOKEN` in the env store.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::config::JiraConfig;
use crate::env_store::{EnvStore, JIRA_TOKEN};

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TicketSpec {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// CLI-level overrides for [`JiraSettings::resolve`].
#[derive(Debug, Clone, Default)]
pub struct JiraOverrides {
    pub server: Option<String>,
    pub username: Option<String>,
    pub token: Option<String>,
    pub project: Option<String>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub transition: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JiraSettings {
    pub server: String,
    pub username: String,
    pub token: String,
    pub project: String,
    pub assignee: Option<String>,
    pub issue_type: String,
    pub labels: Vec<String>,
    pub transition: Option<String>,
}

impl JiraSettings {
    pub fn resolve(config: &JiraConfig, env: &EnvStore, overrides: JiraOverrides) -> Result<Self> {
        let server = overrides.server.or_else(|| config.server.clone());
        let username = overrides.username.or_else(|| config.username.clone());
        let token = overrides.token.or_else(|| env.get(JIRA_TOKEN));
        let project = overrides.project.or_else(|| config.project.clone());

        let (Some(server), Some(username), Some(token), Some(project)) =
            (server, username, token, project)
        else {
            bail!("Please provide Jira server, username, token, and project.");
        };

        Ok(Self {
            server: server.trim_end_matches('/').to_string(),
            username,
            token,
            project,
            assignee: overrides.assignee.or_else(|| config.assignee_id.clone()),
            issue_type: config.issue_type.clone(),
            labels: overrides.labels,
            transition: overrides.transition,
        })
    }
}

pub fn load_tickets(path: &Path) -> Result<Vec<TicketSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ticket file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse ticket file: {}", path.display()))
}

/// Description with the steps appended as a bullet list.
pub fn description(ticket: &TicketSpec) -> String {
    let mut out = ticket.description.clone();
    if !ticket.steps.is_empty() {
        out.push_str("\n\nSteps:\n");
        for step in &ticket.steps {
            out.push_str("- ");
            out.push_str(step);
            out.push('\n');
        }
    }
    out
}

/// The `fields` object of a create-issue request.
pub fn issue_fields(ticket: &TicketSpec, settings: &JiraSettings) -> Value {
    let mut fields = json!({
        "project": { "key": settings.project },
        "summary": ticket.title,
        "description": description(ticket),
        "issuetype": { "name": settings.issue_type },
    });
    let mut labels: Vec<&str> = settings.labels.iter().map(String::as_str).collect();
    for label in &ticket.labels {
        if !labels.contains(&label.as_str()) {
            labels.push(label);
        }
    }
    if !labels.is_empty() {
        fields["labels"] = json!(labels);
    }
    if let Some(assignee) = &settings.assignee {
        fields["assignee"] = json!({ "id": assignee });
    }
    fields
}

pub struct JiraClient {
    client: reqwest::blocking::Client,
    settings: JiraSettings,
}

impl JiraClient {
    pub fn new(settings: JiraSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2/{}", self.settings.server, path)
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder, what: &str) -> Result<Value> {
        let response = request
            .basic_auth(&self.settings.username, Some(&self.settings.token))
            .send()
            .with_context(|| format!("Jira request failed: {what}"))?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            bail!("Jira {} failed: HTTP {}: {}", what, status, body);
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).with_context(|| format!("Invalid Jira response for {what}"))
    }

    /// Create one issue and return its key.
    pub fn create_issue(&self, ticket: &TicketSpec) -> Result<String> {
        let body = json!({ "fields": issue_fields(ticket, &self.settings) });
        let created = self.send(self.client.post(self.url("issue")).json(&body), "create issue")?;
        created["key"]
            .as_str()
            .map(str::to_string)
            .context("Jira response has no issue key")
    }

    /// Move `key` through the transition named `name` (case-insensitive).
    pub fn transition(&self, key: &str, name: &str) -> Result<()> {
        let path = format!("issue/{key}/transitions");
        let available = self.send(self.client.get(self.url(&path)), "list transitions")?;
        let id = available["transitions"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|t| {
                t["name"]
                    .as_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|t| t["id"].as_str())
            .with_context(|| format!("Transition '{name}' is not available for {key}"))?
            .to_string();
        self.send(
            self.client
                .post(self.url(&path))
                .json(&json!({ "transition": { "id": id } })),
            "transition issue",
        )?;
        Ok(())
    }
}

/// Create every ticket, printing each key. Returns the created keys.
pub fn create_tickets(client: &JiraClient, tickets: &[TicketSpec], out: &mut dyn Write) -> Result<Vec<String>> {
    let mut keys = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        let key = client.create_issue(ticket)?;
        writeln!(out, "Created ticket: {} - {}", key, ticket.title)?;
        if let Some(name) = &client.settings.transition {
            client.transition(&key, name)?;
            writeln!(out, "Moved ticket {key} to {name}")?;
        }
        keys.push(key);
    }
    Ok(keys)
}
