//! Evaluator backed by an external training executable.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, info, warn};

use hs_types::{
    EvaluationError, Evaluator, HsResult, ParameterDocument, RunConfig, TrialRequest,
};

use crate::results::ResultLog;
use crate::score::ScorePolicy;

/// Lines of evaluator stderr kept in warnings and errors.
const STDERR_TAIL_LINES: usize = 20;

/// Runs the configured executable once per trial and scores its result log.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    config: RunConfig,
    program: Vec<String>,
    policy: ScorePolicy,
}

impl CommandEvaluator {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            program: config.evaluator_program(),
            policy: ScorePolicy::from_config(config),
            config: config.clone(),
        }
    }

    /// Arguments for one trial, after the program and its leading args.
    pub fn trial_args(&self, params_path: &Path, label: &str) -> Vec<String> {
        let mut args = vec![
            format!("-paramsFile={}", params_path.display()),
            "-nogui=true".to_string(),
            "-epclog=true".to_string(),
            format!("-params={label}"),
            format!("-runs={}", self.config.num_runs),
            format!("-epochs={}", self.config.num_epochs),
            format!("-randomize={}", self.config.randomize),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Ask the executable to write its parameter document to `path` and exit,
    /// then load it.
    pub fn dump_document<P: AsRef<Path>>(&self, path: P) -> HsResult<ParameterDocument> {
        let path = absolute(path.as_ref())?;
        let mut args = vec![format!("-hyperFile={}", path.display())];
        args.extend(self.config.extra_args.iter().cloned());

        info!(path = %path.display(), "requesting parameter document from evaluator");
        let output = self.launch(&args)?;
        if !output.status.success() {
            return Err(EvaluationError::LaunchFailed {
                message: format!(
                    "document dump exited with {}: {}",
                    output.status,
                    stderr_tail(&output)
                ),
            }
            .into());
        }
        ParameterDocument::load(&path)
    }

    fn launch(&self, args: &[String]) -> Result<Output, EvaluationError> {
        let (program, leading) = self
            .program
            .split_first()
            .filter(|(program, _)| !program.is_empty())
            .ok_or_else(|| EvaluationError::LaunchFailed {
                message: "no evaluator command configured".to_string(),
            })?;

        debug!(program = %program, ?leading, ?args, "launching evaluator");
        Command::new(program)
            .args(leading)
            .args(args)
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| EvaluationError::LaunchFailed {
                message: format!("{program}: {e}"),
            })
    }
}

impl Evaluator for CommandEvaluator {
    fn evaluate(&self, request: &TrialRequest) -> HsResult<f64> {
        let params_path = absolute(&request.params_path)?;
        let log_path = self.config.result_log_path(&request.label);
        if log_path.exists() {
            debug!(path = %log_path.display(), "removing stale result log");
            std::fs::remove_file(&log_path)?;
        }

        let output = self.launch(&self.trial_args(&params_path, &request.label))?;
        if !output.status.success() {
            warn!(
                label = %request.label,
                status = %output.status,
                stderr = %stderr_tail(&output),
                "evaluator exited unsuccessfully"
            );
        }

        let log = ResultLog::read(&log_path)?;
        let score = self.policy.score(&log)?;
        debug!(label = %request.label, score, "trial scored");
        Ok(score)
    }
}

fn absolute(path: &Path) -> HsResult<PathBuf> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_types::HsError;
    use tempfile::TempDir;

    fn config(dir: &TempDir, command: Vec<String>) -> RunConfig {
        RunConfig::new("RA25", "#LastZero")
            .with_schedule(30, 1)
            .with_fallback(Some("#FirstZero"), -1.0, 2.0)
            .with_dirs(dir.path(), dir.path())
            .with_evaluator_command(command)
    }

    #[test]
    fn trial_args_match_executable_flags() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, vec!["./ra25".into()]).with_schedule(40, 3);
        cfg.randomize = true;
        cfg.extra_args = vec!["-trls=20".into()];
        let evaluator = CommandEvaluator::from_config(&cfg);

        let params = Path::new("/tmp/hyperparams_Searching_2.json");
        let args = evaluator.trial_args(params, "Searching_2");
        assert_eq!(
            args,
            vec![
                "-paramsFile=/tmp/hyperparams_Searching_2.json",
                "-nogui=true",
                "-epclog=true",
                "-params=Searching_2",
                "-runs=3",
                "-epochs=40",
                "-randomize=true",
                "-trls=20",
            ]
        );
    }

    #[test]
    fn empty_command_cannot_launch() {
        let dir = TempDir::new().unwrap();
        let evaluator = CommandEvaluator::from_config(&config(&dir, vec![String::new()]));
        let request = TrialRequest {
            index: 0,
            label: "Searching_0".into(),
            params_path: dir.path().join("p.json"),
        };
        let err = evaluator.evaluate(&request).unwrap_err();
        assert!(matches!(
            err,
            HsError::Evaluation(EvaluationError::LaunchFailed { .. })
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn missing_binary_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let evaluator = CommandEvaluator::from_config(&config(
            &dir,
            vec!["/definitely/not/a/real/evaluator".into()],
        ));
        let request = TrialRequest {
            index: 0,
            label: "Searching_0".into(),
            params_path: dir.path().join("p.json"),
        };
        let err = evaluator.evaluate(&request).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("could not be started"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        const FAKE_EVALUATOR: &str = r#"
label=""
for arg in "$@"; do
  case "$arg" in
    -hyperFile=*)
      printf '%s' '[{"Name":"Base","Sheets":{"Network":[{"Params":{"Gain":"2"},"Hypers":{"Gain":{"Val":"1"}}}]}}]' > "${arg#-hyperFile=}"
      exit 0
      ;;
    -params=*) label="${arg#-params=}" ;;
  esac
done
mkdir -p logs
printf '|Run\t#LastZero\t#FirstZero\n0\t-1\t12\n' > "logs/RA25_${label}_run.tsv"
echo "finished $label" >&2
exit 1
"#;

        fn fake(dir: &TempDir) -> Vec<String> {
            let script = dir.path().join("fake_evaluator.sh");
            std::fs::write(&script, FAKE_EVALUATOR).unwrap();
            vec!["sh".into(), script.display().to_string()]
        }

        #[test]
        fn scores_result_log_despite_exit_status() {
            let dir = TempDir::new().unwrap();
            let evaluator = CommandEvaluator::from_config(&config(&dir, fake(&dir)));
            let params_path = dir.path().join("hyperparams_Searching_5.json");
            std::fs::write(&params_path, "{}").unwrap();

            let request = TrialRequest {
                index: 5,
                label: "Searching_5".into(),
                params_path,
            };
            assert_eq!(evaluator.evaluate(&request).unwrap(), 24.0);
            assert!(dir.path().join("logs/RA25_Searching_5_run.tsv").exists());
        }

        #[test]
        fn stale_log_is_replaced() {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join("logs")).unwrap();
            std::fs::write(
                dir.path().join("logs/RA25_Searching_1_run.tsv"),
                "|Run\t#LastZero\n0\t3\n",
            )
            .unwrap();

            let evaluator = CommandEvaluator::from_config(&config(&dir, fake(&dir)));
            let request = TrialRequest {
                index: 1,
                label: "Searching_1".into(),
                params_path: dir.path().join("p.json"),
            };
            assert_eq!(evaluator.evaluate(&request).unwrap(), 24.0);
        }

        #[test]
        fn no_log_means_failed_trial() {
            let dir = TempDir::new().unwrap();
            let evaluator = CommandEvaluator::from_config(&config(
                &dir,
                vec!["sh".into(), "-c".into(), "exit 0".into()],
            ));
            let request = TrialRequest {
                index: 0,
                label: "Searching_0".into(),
                params_path: dir.path().join("p.json"),
            };
            let err = evaluator.evaluate(&request).unwrap_err();
            assert!(matches!(
                err,
                HsError::Evaluation(EvaluationError::LogMissing { .. })
            ));
        }

        #[test]
        fn dumps_parameter_document() {
            let dir = TempDir::new().unwrap();
            let evaluator = CommandEvaluator::from_config(&config(&dir, fake(&dir)));
            let doc = evaluator
                .dump_document(dir.path().join("hyperparamsExample.json"))
                .unwrap();
            assert_eq!(doc.name, "Base");
            assert_eq!(doc.hyper_count(), 1);
        }

        #[test]
        fn failed_dump_is_an_error() {
            let dir = TempDir::new().unwrap();
            let evaluator = CommandEvaluator::from_config(&config(
                &dir,
                vec!["sh".into(), "-c".into(), "echo broken >&2; exit 2".into()],
            ));
            let err = evaluator
                .dump_document(dir.path().join("out.json"))
                .unwrap_err();
            assert!(err.to_string().contains("broken"));
        }
    }
}
