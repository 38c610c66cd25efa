//! Face-swap command configuration.

use std::path::Path;

use queue_core::CommandSpec;

/// How the face-swap executable is invoked.
///
/// The command line is
/// `program [script] --headless --source S --target T --output O
/// <leading_options> <extra options> <trailing_options>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSwapConfig {
    pub program: String,
    /// Script passed as the first argument, for interpreters.
    pub script: Option<String>,
    pub leading_options: Vec<String>,
    pub trailing_options: Vec<String>,
}

impl Default for FaceSwapConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            script: Some("/usr/src/app/run.py".to_string()),
            leading_options: to_args(&[
                "--execution-providers",
                "cuda",
                "--execution-thread-count",
                "2",
            ]),
            trailing_options: to_args(&[
                "--output-image-quality",
                "100",
                "--output-video-quality",
                "100",
                "--output-video-encoder",
                "h264_nvenc",
                "--face-mask-types",
                "box",
                "occlusion",
            ]),
        }
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl FaceSwapConfig {
    /// A bare executable with no script and no default options.
    pub fn program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: None,
            leading_options: Vec::new(),
            trailing_options: Vec::new(),
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `FACESWAP_PROGRAM` (default: `python`)
    /// - `FACESWAP_SCRIPT` (default: `/usr/src/app/run.py`, empty for none)
    /// - `FACESWAP_OPTIONS` / `FACESWAP_TRAILING_OPTIONS`: whitespace
    ///   separated, replace the defaults when set
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let program = std::env::var("FACESWAP_PROGRAM")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.program);
        let script = match std::env::var("FACESWAP_SCRIPT") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v.trim().to_string()),
            Err(_) => defaults.script,
        };
        let options = |name: &str, default: Vec<String>| match std::env::var(name) {
            Ok(v) => v.split_whitespace().map(str::to_string).collect(),
            Err(_) => default,
        };

        Self {
            program,
            script,
            leading_options: options("FACESWAP_OPTIONS", defaults.leading_options),
            trailing_options: options("FACESWAP_TRAILING_OPTIONS", defaults.trailing_options),
        }
    }

    /// The command for one source/target pairing.
    pub fn command(
        &self,
        source: &Path,
        target: &Path,
        output: &Path,
        extra_options: &[String],
    ) -> CommandSpec {
        let mut command = CommandSpec::new(&self.program);
        if let Some(script) = &self.script {
            command = command.arg(script);
        }

        command
            .arg("--headless")
            .arg("--source")
            .arg(source.to_string_lossy())
            .arg("--target")
            .arg(target.to_string_lossy())
            .arg("--output")
            .arg(output.to_string_lossy())
            .args(self.leading_options.iter().cloned())
            .args(extra_options.iter().cloned())
            .args(self.trailing_options.iter().cloned())
    }
}

/// Output name for the `index`th target of a batch submitted at `timestamp`
/// (Unix seconds): `{timestamp + index}_{source stem}_{target}`.
pub fn output_name(timestamp: i64, index: usize, source: &str, target: &str) -> String {
    let stem = source.split('.').next().unwrap_or(source);
    let index = i64::try_from(index).unwrap_or(i64::MAX - timestamp);
    format!("{}_{}_{}", timestamp + index, stem, target)
}
