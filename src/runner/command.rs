//! Runner command construction and the dry-listing count.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::config::RunnerConfig;
use crate::projects::ProjectDescriptor;

static LIST_TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Total:\s*(\d+)\s+tests?\b").expect("Invalid list total regex pattern")
});

/// A fully-specified process invocation. Arguments are always a discrete
/// list and never joined into a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl RunnerCommand {
    /// The real run: progress on stdout followed by the JSON report.
    pub fn for_run(config: &RunnerConfig, project: &ProjectDescriptor, grep: Option<&str>) -> Self {
        let mut args = config.args.clone();
        args.extend(config.reporter_args.iter().cloned());
        push_grep(&mut args, grep);

        Self {
            program: config.program.clone(),
            args,
            cwd: project.path.clone(),
            env: runner_env(config, project),
            timeout: config.timeout(),
        }
    }

    /// The cheap pre-pass that only lists matching tests.
    pub fn for_listing(
        config: &RunnerConfig,
        project: &ProjectDescriptor,
        grep: Option<&str>,
    ) -> Self {
        let mut args = config.args.clone();
        args.extend(config.list_args.iter().cloned());
        push_grep(&mut args, grep);

        Self {
            program: config.program.clone(),
            args,
            cwd: project.path.clone(),
            env: runner_env(config, project),
            timeout: config.list_timeout(),
        }
    }
}

fn push_grep(args: &mut Vec<String>, grep: Option<&str>) {
    if let Some(g) = grep {
        args.push("--grep".to_string());
        args.push(g.to_string());
    }
}

fn runner_env(config: &RunnerConfig, project: &ProjectDescriptor) -> BTreeMap<String, String> {
    let mut env = config.env.clone();
    env.insert("FORCE_COLOR".to_string(), "0".to_string());
    if let Some(url) = &project.base_url {
        env.insert("BASE_URL".to_string(), url.clone());
    }
    if let Some(port) = project.port {
        env.insert("PORT".to_string(), port.to_string());
    }
    env
}

/// Number of tests a listing reports.
///
/// Prefers the runner's `Total: N tests in M files` trailer and otherwise
/// counts listing lines carrying the `›` title separator.
pub fn count_listed_tests(output: &str) -> Option<u64> {
    if let Some(total) = LIST_TOTAL_RE
        .captures_iter(output)
        .last()
        .and_then(|cap| cap[1].parse().ok())
    {
        return Some(total);
    }

    let counted = output.lines().filter(|l| l.contains('›')).count() as u64;
    (counted > 0).then_some(counted)
}
