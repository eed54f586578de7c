//! AgentCI — records, summarizes, diffs, and integrity-verifies the
//! observable side-effects of AI agent runs.
//!
//! This is the CLI entry point. It wires the recording runtime and the
//! offline tools together over the `.agentci/` directory tree:
//!
//! - **record**: run a command under the recording environment
//! - **summarize**: project a run's trace into an effect signature
//! - **diff**: set-difference a signature against the stored baseline
//! - **evaluate**: apply the policy config to a signature
//! - **verify**: authenticate run artifacts with the project HMAC secret
//! - **baseline**: promote a run's signature to the project baseline
//! - **similar** / **anomaly**: K-NN similarity over past runs
//!
//! Exit codes: 0 on PASS/WARN, 1 on BLOCK or any verification failure.

use anyhow::{bail, Context, Result};
use std::path::Path;

use agentci::config::PolicyConfig;
use agentci::policy::evaluate::{self, Verdict};
use agentci::signature::{build_signature, BuildOptions, EffectSignature};
use agentci::{baseline, diff, integrity, runs, similarity};

fn print_help() {
    eprintln!(
        r#"agentci — effect recording and policy evaluation for AI agent runs

USAGE:
    agentci <COMMAND> [OPTIONS]

COMMANDS:
    init                      Create .agentci/ with a default config and secret
    record [--enforce] -- <command...>
                              Run a command under the recording environment
    summarize <run>           Build the effect signature for a run
    diff <run>                Diff a run's signature against the baseline
    evaluate <run>            Evaluate a run's signature under the policy
    verify <run>              Verify run artifacts against their checksums
    baseline <run> [--reason <text>]
                              Promote a run's signature to the baseline
    similar <run> [--top <k>] Find the most similar past runs
    anomaly <run> [--k <k>] [--threshold <t>]
                              K-NN anomaly score against past runs
    help                      Show this help message
    version                   Show version info

OPTIONS:
    --format json             Structured output for diff/evaluate/verify/summarize

EXAMPLES:
    agentci init
    agentci record -- node agent.js
    agentci summarize 1723456789012-a1b2c3d4e5f6
    agentci evaluate 1723456789012-a1b2c3d4e5f6 --format json
    agentci baseline 1723456789012-a1b2c3d4e5f6 --reason "reviewed run"

CONFIG:
    Policy config path: .agentci/config.yaml (falls back to defaults)
"#
    );
}

fn print_version() {
    eprintln!("agentci v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Effect recording and policy evaluation for AI agent runs");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let subcommand = args.first().map(String::as_str).unwrap_or("help");
    let rest: Vec<String> = args.iter().skip(1).cloned().collect();

    let code = match run(subcommand, &rest) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("agentci: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(subcommand: &str, rest: &[String]) -> Result<i32> {
    let workspace = std::env::current_dir().with_context(|| "cannot determine cwd")?;
    match subcommand {
        "help" | "--help" | "-h" => {
            print_help();
            Ok(0)
        }
        "version" | "--version" | "-V" => {
            print_version();
            Ok(0)
        }
        "init" => cmd_init(&workspace),
        "record" => cmd_record(&workspace, rest),
        "summarize" => cmd_summarize(&workspace, rest),
        "diff" => cmd_diff(&workspace, rest),
        "evaluate" => cmd_evaluate(&workspace, rest),
        "verify" => cmd_verify(&workspace, rest),
        "baseline" => cmd_baseline(&workspace, rest),
        "similar" => cmd_similar(&workspace, rest),
        "anomaly" => cmd_anomaly(&workspace, rest),
        other => {
            eprintln!("agentci: unknown command '{}'\n", other);
            print_help();
            Ok(1)
        }
    }
}

// ─── Argument helpers ───────────────────────────────────────────────────────

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn json_format(args: &[String]) -> bool {
    flag_value(args, "--format") == Some("json")
}

/// Flags that take a value; their value must not be mistaken for a run id.
const VALUE_FLAGS: &[&str] = &["--format", "--reason", "--top", "--k", "--threshold"];

fn run_ref(args: &[String]) -> Result<&str> {
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if !arg.starts_with("--") {
            return Ok(arg);
        }
    }
    bail!("missing run id (see `agentci help`)")
}

fn tool_version() -> String {
    std::env::var("AGENTCI_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string())
}

fn load_config(workspace: &Path) -> PolicyConfig {
    PolicyConfig::load_or_default(Some(&runs::config_path(workspace)), workspace)
}

fn build_options() -> BuildOptions {
    BuildOptions {
        tool_version: tool_version(),
        scenario_id: std::env::var("AGENTCI_SCENARIO_ID").ok(),
    }
}

/// The run's signature: load `signature.json` if present, otherwise build
/// it from the trace.
fn load_or_build_signature(run_dir: &Path, config: &PolicyConfig) -> Result<EffectSignature> {
    let signature_path = run_dir.join(runs::SIGNATURE_FILE);
    if signature_path.is_file() {
        return EffectSignature::load(&signature_path);
    }
    build_signature(&run_dir.join(runs::TRACE_FILE), config, &build_options())
}

// ─── Commands ───────────────────────────────────────────────────────────────

fn cmd_init(workspace: &Path) -> Result<i32> {
    let dir = runs::agentci_dir(workspace);
    std::fs::create_dir_all(runs::runs_dir(workspace))
        .with_context(|| format!("cannot create {}", dir.display()))?;

    let config_path = runs::config_path(workspace);
    if config_path.exists() {
        eprintln!("config already exists: {}", config_path.display());
    } else {
        PolicyConfig::default().save(&config_path)?;
        eprintln!("wrote default config: {}", config_path.display());
    }

    let secret_path = integrity::generate_secret(workspace)?;
    eprintln!("project secret: {}", secret_path.display());
    eprintln!("initialized {}", dir.display());
    Ok(0)
}

fn cmd_record(workspace: &Path, args: &[String]) -> Result<i32> {
    let separator = args.iter().position(|a| a == "--");
    let Some(separator) = separator else {
        bail!("usage: agentci record [--enforce] -- <command...>");
    };
    let flags = &args[..separator];
    let command_args = &args[separator + 1..];
    if command_args.is_empty() {
        bail!("usage: agentci record [--enforce] -- <command...>");
    }
    let enforce = has_flag(flags, "--enforce");

    let run_id = runs::new_run_id();
    let run_dir = runs::run_dir(workspace, &run_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("cannot create run dir {}", run_dir.display()))?;

    let mut command = std::process::Command::new(&command_args[0]);
    command
        .args(&command_args[1..])
        .env("AGENTCI_RUN_DIR", &run_dir)
        .env("AGENTCI_RUN_ID", &run_id)
        .env("AGENTCI_WORKSPACE_ROOT", workspace)
        .env("AGENTCI_VERSION", tool_version());
    let config_path = runs::config_path(workspace);
    if config_path.is_file() {
        command.env("AGENTCI_CONFIG_PATH", &config_path);
    }
    if enforce {
        command.env("AGENTCI_ENFORCE", "1");
    }

    eprintln!("recording run {} ({})", run_id, command_args.join(" "));
    let started_at = chrono::Utc::now();
    let status = command
        .status()
        .with_context(|| format!("failed to run {:?}", command_args[0]))?;
    let exit_code = status.code().unwrap_or(1);
    let finished_at = chrono::Utc::now();

    let metadata_path = run_dir.join("metadata.json");
    std::fs::write(
        &metadata_path,
        serde_json::to_string_pretty(&serde_json::json!({
            "run_id": run_id,
            "command": command_args,
            "exit_code": exit_code,
            "started_at": started_at.to_rfc3339(),
            "finished_at": finished_at.to_rfc3339(),
            "tool_version": tool_version(),
        }))?,
    )
    .with_context(|| format!("cannot write {}", metadata_path.display()))?;

    // An uninstrumented host leaves no trace; the empty log is still a
    // valid recording (ten empty lists downstream).
    let trace_path = run_dir.join(runs::TRACE_FILE);
    if !trace_path.exists() {
        std::fs::write(&trace_path, b"")
            .with_context(|| format!("cannot create {}", trace_path.display()))?;
    }
    integrity::write_checksum(&trace_path, integrity::ChecksumKind::Trace, &run_id, workspace)?;

    let config = load_config(workspace);
    let signature = build_signature(&trace_path, &config, &build_options())?;
    let signature_path = run_dir.join(runs::SIGNATURE_FILE);
    signature.save(&signature_path)?;
    integrity::write_checksum(
        &signature_path,
        integrity::ChecksumKind::Signature,
        &run_id,
        workspace,
    )?;

    eprintln!("run {} recorded (command exit code {})", run_id, exit_code);
    Ok(exit_code)
}

fn cmd_summarize(workspace: &Path, args: &[String]) -> Result<i32> {
    let run_id = run_ref(args)?;
    let run_dir = runs::resolve_run_dir(workspace, run_id)?;
    let config = load_config(workspace);

    let trace_path = run_dir.join(runs::TRACE_FILE);
    let signature = build_signature(&trace_path, &config, &build_options())?;
    let signature_path = run_dir.join(runs::SIGNATURE_FILE);
    signature.save(&signature_path)?;
    integrity::write_checksum(
        &signature_path,
        integrity::ChecksumKind::Signature,
        run_id,
        workspace,
    )?;

    if json_format(args) {
        println!("{}", serde_json::to_string_pretty(&signature)?);
    } else {
        print_signature(&signature);
    }
    Ok(0)
}

fn cmd_diff(workspace: &Path, args: &[String]) -> Result<i32> {
    let run_id = run_ref(args)?;
    let run_dir = runs::resolve_run_dir(workspace, run_id)?;
    let config = load_config(workspace);

    let current = load_or_build_signature(&run_dir, &config)?;
    let baseline_sig = baseline::load_baseline(workspace)?;
    let result = diff::diff(&current, baseline_sig.as_ref());

    if json_format(args) {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if baseline_sig.is_none() {
        println!("no baseline set: every current effect counts as drift");
        print_effects("drift", &result.drift);
    } else if result.is_empty() {
        println!("no drift against baseline");
    } else {
        print_effects("drift", &result.drift);
    }
    Ok(0)
}

fn cmd_evaluate(workspace: &Path, args: &[String]) -> Result<i32> {
    let run_id = run_ref(args)?;
    let run_dir = runs::resolve_run_dir(workspace, run_id)?;
    let config = load_config(workspace);

    let signature = load_or_build_signature(&run_dir, &config)?;
    let findings = evaluate::evaluate(&signature, &config);
    let verdict = evaluate::verdict(&findings);

    let findings_path = run_dir.join(runs::FINDINGS_FILE);
    std::fs::write(
        &findings_path,
        serde_json::to_string_pretty(&serde_json::json!({
            "verdict": verdict,
            "findings": findings,
        }))?,
    )
    .with_context(|| format!("cannot write {}", findings_path.display()))?;

    if json_format(args) {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": run_id,
                "verdict": verdict,
                "findings": findings,
            }))?
        );
    } else {
        for finding in &findings {
            println!(
                "{} [{}] {}",
                finding.severity, finding.category, finding.message
            );
            if let Some(suggestion) = &finding.suggestion {
                println!("       hint: {}", suggestion);
            }
        }
        match verdict {
            Verdict::Pass => println!("PASS: no policy findings"),
            _ => println!("verdict: {}", verdict),
        }
    }
    Ok(evaluate::exit_code(verdict))
}

fn cmd_verify(workspace: &Path, args: &[String]) -> Result<i32> {
    let run_id = run_ref(args)?;
    let run_dir = runs::resolve_run_dir(workspace, run_id)?;

    let mut checks: Vec<(String, integrity::VerifyResult)> = Vec::new();
    for file in [runs::TRACE_FILE, runs::SIGNATURE_FILE] {
        if let Some(result) =
            integrity::verify_if_present(&run_dir.join(file), run_id, workspace)
        {
            checks.push((file.to_string(), result));
        }
    }
    if checks.is_empty() {
        bail!("run {} has no artifacts to verify", run_id);
    }
    let valid = checks.iter().all(|(_, r)| r.valid);

    if json_format(args) {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": run_id,
                "valid": valid,
                "checks": checks
                    .iter()
                    .map(|(file, r)| serde_json::json!({
                        "file": file,
                        "valid": r.valid,
                        "details": r.details,
                    }))
                    .collect::<Vec<_>>(),
            }))?
        );
    } else {
        for (file, result) in &checks {
            let tag = if result.valid { "ok" } else { "FAILED" };
            println!("{:9} {}: {}", tag, file, result.details);
        }
        println!(
            "verification {}",
            if valid { "passed" } else { "FAILED" }
        );
    }
    Ok(if valid { 0 } else { 1 })
}

fn cmd_baseline(workspace: &Path, args: &[String]) -> Result<i32> {
    let run_id = run_ref(args)?;
    runs::resolve_run_dir(workspace, run_id)?;
    let reason = flag_value(args, "--reason");
    let path = baseline::set_baseline(workspace, run_id, reason)?;
    eprintln!("baseline set from run {}: {}", run_id, path.display());
    Ok(0)
}

fn cmd_similar(workspace: &Path, args: &[String]) -> Result<i32> {
    let run_id = run_ref(args)?;
    let run_dir = runs::resolve_run_dir(workspace, run_id)?;
    let config = load_config(workspace);
    let top = flag_value(args, "--top")
        .map(|v| v.parse::<usize>())
        .transpose()
        .with_context(|| "--top must be a number")?
        .unwrap_or(similarity::DEFAULT_K);

    let query = load_or_build_signature(&run_dir, &config)?;
    let corpus: Vec<_> = similarity::load_run_signatures(&runs::runs_dir(workspace))
        .into_iter()
        .filter(|(id, _)| id != run_id)
        .collect();

    let neighbors = similarity::nearest_neighbors(&query, &corpus, top);
    if neighbors.is_empty() {
        println!("no other runs with signatures to compare against");
    }
    for neighbor in &neighbors {
        println!("{:.4}  {}", neighbor.similarity, neighbor.run_id);
    }
    Ok(0)
}

fn cmd_anomaly(workspace: &Path, args: &[String]) -> Result<i32> {
    let run_id = run_ref(args)?;
    let run_dir = runs::resolve_run_dir(workspace, run_id)?;
    let config = load_config(workspace);
    let k = flag_value(args, "--k")
        .map(|v| v.parse::<usize>())
        .transpose()
        .with_context(|| "--k must be a number")?
        .unwrap_or(similarity::DEFAULT_K);
    let threshold = flag_value(args, "--threshold")
        .map(|v| v.parse::<f64>())
        .transpose()
        .with_context(|| "--threshold must be a number")?
        .unwrap_or(similarity::DEFAULT_THRESHOLD);

    let query = load_or_build_signature(&run_dir, &config)?;
    let corpus: Vec<_> = similarity::load_run_signatures(&runs::runs_dir(workspace))
        .into_iter()
        .filter(|(id, _)| id != run_id)
        .collect();

    let report = similarity::anomaly_score(&query, &corpus, k, threshold);
    if json_format(args) {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "anomaly score {:.4} (threshold {:.2}, k={}): {}",
            report.score,
            report.threshold,
            report.k,
            if report.anomalous { "ANOMALOUS" } else { "normal" }
        );
        for neighbor in &report.neighbors {
            println!("  {:.4}  {}", neighbor.similarity, neighbor.run_id);
        }
    }
    Ok(0)
}

// ─── Output helpers ─────────────────────────────────────────────────────────

fn print_signature(signature: &EffectSignature) {
    println!(
        "signature v{} (adapter {}, tool {})",
        signature.meta.signature_version, signature.meta.adapter, signature.meta.tool_version
    );
    print_effects("effects", &signature.effects);
}

fn print_effects(label: &str, effects: &agentci::signature::SignatureEffects) {
    let mut printed = false;
    let mut section = |name: &str, values: &[String]| {
        if !values.is_empty() {
            println!("{}.{}:", label, name);
            for value in values {
                println!("  {}", value);
            }
            printed = true;
        }
    };
    section("fs_writes", &effects.fs_writes);
    section("fs_reads_external", &effects.fs_reads_external);
    section("fs_deletes", &effects.fs_deletes);
    section("net_protocols", &effects.net_protocols);
    section("net_etld_plus_1", &effects.net_etld_plus_1);
    section("net_hosts", &effects.net_hosts);
    let ports: Vec<String> = effects.net_ports.iter().map(|p| p.to_string()).collect();
    section("net_ports", &ports);
    section("exec_commands", &effects.exec_commands);
    section("exec_argv", &effects.exec_argv);
    section("sensitive_keys_accessed", &effects.sensitive_keys_accessed);
    if !printed {
        println!("{}: (empty)", label);
    }
}
