//! Pattern-driven prompting.
//!
//! A pattern is a directory under the patterns dir holding a `system.md`
//! prompt. `process` turns a pattern plus user text into a [`Conversation`],
//! picks a provider for the model and prints the reply:
//!
//! ```text
//! <patterns_dir>/<pattern>/system.md ─┐
//!            --context (prepended) ───┼─▶ system ─┐
//! --text │ stdin │ interactive prompt ─────▶ user ─┴─▶ ProviderManager::select ─▶ send / stream
//! ```
//!
//! `update` replaces the patterns directory from a downloaded archive,
//! carrying over patterns the archive does not contain.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::env_store::{
    EnvStore, CLAUDE_API_KEY, DEFAULT_MODEL, GOOGLE_API_KEY, OPENAI_API_KEY, YOUTUBE_API_KEY,
};
use crate::models::{Conversation, ModelDescriptor};
use crate::provider::{GenerationArgs, ModelProvider, ProviderKind, ProviderManager};

const PATTERN_FILE: &str = "system.md";

/// Options for one `fabric process` run.
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub pattern: Option<String>,
    pub text: Option<String>,
    pub context: Option<String>,
    pub model: Option<String>,
    pub provider: Option<ProviderKind>,
    pub stream: bool,
    pub output: Option<PathBuf>,
}

/// Read `<patterns_dir>/<name>/system.md`.
pub fn load_pattern(patterns_dir: &Path, name: &str) -> Result<String> {
    if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
        bail!("Invalid pattern name: '{}'", name);
    }
    let path = patterns_dir.join(name).join(PATTERN_FILE);
    if !path.is_file() {
        bail!("Pattern file not found: {}", path.display());
    }
    std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read pattern: {}", path.display()))
}

/// Installed pattern names, sorted.
pub fn list_patterns(patterns_dir: &Path) -> Result<Vec<String>> {
    if !patterns_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(patterns_dir)
        .with_context(|| format!("Failed to read patterns dir: {}", patterns_dir.display()))?
    {
        let entry = entry?;
        if entry.path().join(PATTERN_FILE).is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// System prompt from an optional pattern and optional context.
pub fn system_prompt(pattern: Option<&str>, context: Option<&str>) -> Option<String> {
    let context = context.map(str::trim).filter(|c| !c.is_empty());
    match (context, pattern) {
        (Some(context), Some(pattern)) => Some(format!("{context}\n\n{pattern}")),
        (Some(context), None) => Some(context.to_string()),
        (None, Some(pattern)) => Some(pattern.to_string()),
        (None, None) => None,
    }
}

/// `--model`, else the stored `DEFAULT_MODEL`, else `[fabric] default_model`.
pub fn resolve_model(explicit: Option<&str>, env: &EnvStore, config: &Config) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| env.get(DEFAULT_MODEL))
        .unwrap_or_else(|| config.fabric.default_model.clone())
}

/// `--text`, else piped stdin, else an interactive prompt.
pub fn read_input(text: Option<String>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if !atty::is(atty::Stream::Stdin) {
        let mut buf = String::new();
        io::stdin()
            .lock()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    dialoguer::Input::<String>::new()
        .with_prompt("Enter your message")
        .interact_text()
        .context("Failed to read message")
}

/// Run a whole `fabric process` request.
pub fn process(config: &Config, env: &EnvStore, request: ProcessRequest, out: &mut dyn Write) -> Result<()> {
    let pattern = match &request.pattern {
        Some(name) => Some(load_pattern(&config.patterns_dir(), name)?),
        None => None,
    };
    let text = read_input(request.text.clone())?;
    let conversation = Conversation::new(
        system_prompt(pattern.as_deref(), request.context.as_deref()),
        text,
    );
    let model = resolve_model(request.model.as_deref(), env, config);
    let manager = ProviderManager::new(config, env)?;
    let provider = manager.select(&model, request.provider)?;
    run(
        provider.as_ref(),
        &conversation,
        &model,
        request.stream,
        request.output.as_deref(),
        out,
    )
}

/// Send or stream `conversation`, print the reply and optionally save it.
pub fn run(
    provider: &dyn ModelProvider,
    conversation: &Conversation,
    model: &str,
    stream: bool,
    output: Option<&Path>,
    out: &mut dyn Write,
) -> Result<()> {
    let args = GenerationArgs::default();
    let response = if stream {
        let mut response = String::new();
        for chunk in provider.stream_message(conversation, model, &args)? {
            let chunk = chunk?;
            out.write_all(chunk.as_bytes())?;
            out.flush()?;
            response.push_str(&chunk);
        }
        writeln!(out)?;
        response
    } else {
        let response = provider.send_message(conversation, model, &args)?;
        writeln!(out, "{response}")?;
        response
    };

    if let Some(path) = output {
        std::fs::write(path, &response)
            .with_context(|| format!("Failed to write response: {}", path.display()))?;
    }
    Ok(())
}

/// Models per reachable provider.
pub fn models(config: &Config, env: &EnvStore) -> Result<BTreeMap<ProviderKind, Vec<ModelDescriptor>>> {
    Ok(ProviderManager::new(config, env)?.discover())
}

// ═══════════════════════════════════════════════════════════════════════
// Setup
// ═══════════════════════════════════════════════════════════════════════

const SETUP_KEYS: [(&str, &str); 4] = [
    (OPENAI_API_KEY, "OpenAI API key"),
    (CLAUDE_API_KEY, "Claude API key"),
    (GOOGLE_API_KEY, "Google API key"),
    (YOUTUBE_API_KEY, "YouTube API key"),
];

/// Prompt for API keys and a default model. Blank answers keep the current value.
pub fn setup(env: &mut EnvStore) -> Result<()> {
    for (key, description) in SETUP_KEYS {
        let value = dialoguer::Password::new()
            .with_prompt(format!("Enter your {description} (press Enter to skip)"))
            .allow_empty_password(true)
            .interact()
            .with_context(|| format!("Failed to read {description}"))?;
        if !value.trim().is_empty() {
            env.set(key, value.trim())?;
        }
    }

    let model: String = dialoguer::Input::new()
        .with_prompt("Default model (press Enter to skip)")
        .allow_empty(true)
        .interact_text()
        .context("Failed to read default model")?;
    if !model.trim().is_empty() {
        env.set(DEFAULT_MODEL, model.trim())?;
        println!("Default model set to {}", model.trim());
    }

    println!("Settings saved to {}", env.path().display());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Update
// ═══════════════════════════════════════════════════════════════════════

/// Download the pattern archive and install it.
pub fn update(config: &Config) -> Result<usize> {
    let url = &config.fabric.patterns_url;
    tracing::info!(url = %url, "downloading patterns");
    let response = reqwest::blocking::Client::builder()
        .user_agent(concat!("spindle/", env!("CARGO_PKG_VERSION")))
        .build()?
        .get(url)
        .send()
        .with_context(|| format!("Failed to download patterns from {url}"))?;
    if !response.status().is_success() {
        bail!("Failed to download patterns: HTTP {}", response.status());
    }
    let bytes = response.bytes().context("Failed to read patterns archive")?;
    let installed = install_patterns(&bytes, &config.fabric.patterns_subdir, &config.patterns_dir())?;
    println!("Patterns updated successfully.");
    Ok(installed)
}

/// Replace `dest` with the `subdir` tree of `archive`.
///
/// Top-level entries of `dest` missing from the archive are user patterns
/// and are carried over. Returns the number of patterns now installed.
pub fn install_patterns(archive: &[u8], subdir: &str, dest: &Path) -> Result<usize> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).context("Invalid patterns archive")?;
    let staging = tempfile::tempdir().context("Failed to create staging directory")?;
    let fresh = staging.path().join("patterns");
    std::fs::create_dir_all(&fresh)?;

    let prefix = format!("{}/", subdir.trim_matches('/'));
    let mut found = false;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        let name = name.to_string_lossy().replace('\\', "/");
        let Some(relative) = name.strip_prefix(&prefix) else {
            continue;
        };
        found = true;
        if relative.is_empty() {
            continue;
        }
        let target = fresh.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&target)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        io::copy(&mut entry, &mut file)?;
    }
    if !found {
        bail!("Patterns folder '{}' not found in the downloaded archive.", subdir);
    }

    if dest.is_dir() {
        for entry in std::fs::read_dir(dest)? {
            let entry = entry?;
            let carried = fresh.join(entry.file_name());
            if !carried.exists() {
                tracing::debug!(pattern = %entry.file_name().to_string_lossy(), "keeping custom pattern");
                copy_tree(&entry.path(), &carried)?;
            }
        }
        std::fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to remove {}", dest.display()))?;
    }
    copy_tree(&fresh, dest)?;
    list_patterns(dest).map(|p| p.len())
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    if from.is_file() {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to)
            .with_context(|| format!("Failed to copy {}", from.display()))?;
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stub::StubProvider;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn pattern_dir(patterns: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (name, prompt) in patterns {
            let dir = tmp.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(PATTERN_FILE), prompt).unwrap();
        }
        tmp
    }

    #[test]
    fn pattern_loading() {
        let tmp = pattern_dir(&[("summarize", "You summarize.")]);
        assert_eq!(load_pattern(tmp.path(), "summarize").unwrap(), "You summarize.");
        let err = load_pattern(tmp.path(), "missing").unwrap_err();
        assert!(err.to_string().contains("Pattern file not found"));
        assert!(load_pattern(tmp.path(), "../etc").is_err());
        assert_eq!(list_patterns(tmp.path()).unwrap(), vec!["summarize"]);
    }

    #[test]
    fn context_is_prepended() {
        assert_eq!(
            system_prompt(Some("Summarize."), Some("Audience: execs")).as_deref(),
            Some("Audience: execs\n\nSummarize.")
        );
        assert_eq!(system_prompt(None, Some("  ")), None);
        assert_eq!(system_prompt(Some("P"), None).as_deref(), Some("P"));
    }

    #[test]
    fn model_precedence() {
        let config = Config::default();
        let env = EnvStore::new("/nonexistent/.env").isolated();
        assert_eq!(resolve_model(None, &env, &config), "gpt-4-turbo-preview");
        let env = env.with_value(DEFAULT_MODEL, "claude-2.1");
        assert_eq!(resolve_model(None, &env, &config), "claude-2.1");
        assert_eq!(resolve_model(Some("llama3"), &env, &config), "llama3");
    }

    #[test]
    fn send_prints_and_saves() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("reply.md");
        let provider = StubProvider::healthy();
        let mut out = Vec::new();
        run(
            &provider,
            &Conversation::new(None, "ping"),
            "stub-large",
            false,
            Some(&output),
            &mut out,
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "pong\n");
        assert_eq!(std::fs::read_to_string(output).unwrap(), "pong");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stream_prints_chunks() {
        let provider = StubProvider::healthy();
        let mut out = Vec::new();
        run(&provider, &Conversation::new(None, "ping"), "stub-large", true, None, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "pong\n");
    }

    #[test]
    fn provider_failure_propagates() {
        let provider = StubProvider::broken();
        let mut out = Vec::new();
        let err = run(&provider, &Conversation::new(None, "ping"), "stub-large", false, None, &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("Stub"));
        assert!(out.is_empty());
    }

    fn archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn update_keeps_custom_patterns() {
        let dest = pattern_dir(&[("summarize", "old"), ("mine", "custom")]);
        let bytes = archive(&[
            ("fabric-main/README.md", "readme"),
            ("fabric-main/patterns/summarize/system.md", "new"),
            ("fabric-main/patterns/extract_wisdom/system.md", "wisdom"),
        ]);
        let installed = install_patterns(&bytes, "fabric-main/patterns", dest.path()).unwrap();
        assert_eq!(installed, 3);
        assert_eq!(load_pattern(dest.path(), "summarize").unwrap(), "new");
        assert_eq!(load_pattern(dest.path(), "mine").unwrap(), "custom");
        assert!(!dest.path().join("README.md").exists());
    }

    #[test]
    fn update_requires_patterns_folder() {
        let tmp = TempDir::new().unwrap();
        let bytes = archive(&[("other/file.txt", "x")]);
        let err = install_patterns(&bytes, "fabric-main/patterns", &tmp.path().join("p")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
