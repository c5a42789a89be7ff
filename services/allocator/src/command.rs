//! Launch command construction for granted containers.
//!
//! The heap ceiling handed to the worker JVM is derived from the memory the
//! cluster manager actually granted:
//!
//! ```text
//! heap_mb = floor(allocated_mb * heap_ratio) - overhead_mb
//! ```
//!
//! The ratio is applied with truncation, so 2048 MB at ratio 0.8 with 10 MB
//! overhead yields `-Xmx1628M`. A non-positive result is a configuration
//! error: a container launched with it would die on startup.

use thiserror::Error;
use yarnscale_id::InstanceName;

/// Errors produced while building a launch command.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    /// The heap ratio is outside (0, 1].
    #[error("heap ratio must be in (0, 1], got {0}")]
    InvalidRatio(f64),

    /// The derived heap size is zero or negative.
    #[error(
        "derived heap size {heap_mb} MB is not positive \
         (allocated {allocated_mb} MB, ratio {heap_ratio}, overhead {overhead_mb} MB)"
    )]
    NonPositiveHeap {
        allocated_mb: u64,
        heap_ratio: f64,
        overhead_mb: u64,
        heap_mb: i64,
    },
}

/// JVM memory sizing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct JvmSizing {
    /// Megabytes subtracted after applying the ratio.
    pub overhead_mb: u64,

    /// Fraction of the granted memory given to the heap.
    pub heap_ratio: f64,
}

impl Default for JvmSizing {
    fn default() -> Self {
        Self {
            overhead_mb: 0,
            heap_ratio: 1.0,
        }
    }
}

/// Static parts of the worker launch command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTemplate {
    /// Java executable.
    pub java_bin: String,

    /// Extra JVM arguments placed after the heap flag.
    pub jvm_args: Vec<String>,

    /// Worker entry point.
    pub main_class: String,

    /// Application the worker belongs to.
    pub app_name: String,

    /// Directory receiving the worker's stdout/stderr.
    pub log_dir: String,
}

impl Default for LaunchTemplate {
    fn default() -> Self {
        Self {
            java_bin: "$JAVA_HOME/bin/java".to_string(),
            jvm_args: Vec::new(),
            main_class: "yarnscale.worker.TaskRunner".to_string(),
            app_name: "yarnscale".to_string(),
            log_dir: "<LOG_DIR>".to_string(),
        }
    }
}

/// A fully assembled worker launch command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Executable.
    pub program: String,

    /// Arguments, heap flag first.
    pub args: Vec<String>,

    /// Heap ceiling embedded in `args`.
    pub heap_mb: u64,

    /// Stdout redirection target.
    pub stdout_path: String,

    /// Stderr redirection target.
    pub stderr_path: String,
}

impl LaunchCommand {
    /// Render as a single shell command line.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push_str(&format!(" 1>{} 2>{}", self.stdout_path, self.stderr_path));
        line
    }
}

/// Compute the heap ceiling in megabytes.
pub fn heap_size_mb(allocated_mb: u64, overhead_mb: u64, heap_ratio: f64) -> Result<u64, CommandError> {
    if !(heap_ratio > 0.0 && heap_ratio <= 1.0) {
        return Err(CommandError::InvalidRatio(heap_ratio));
    }

    let scaled = (allocated_mb as f64 * heap_ratio).floor() as i64;
    // An overhead beyond i64 can never leave a positive heap.
    let heap_mb = i64::try_from(overhead_mb)
        .ok()
        .and_then(|overhead| scaled.checked_sub(overhead))
        .unwrap_or(i64::MIN);
    if heap_mb <= 0 {
        return Err(CommandError::NonPositiveHeap {
            allocated_mb,
            heap_ratio,
            overhead_mb,
            heap_mb,
        });
    }

    Ok(heap_mb as u64)
}

/// Build the launch command for `instance` on a container granted `allocated_mb`.
pub fn build_launch_command(
    allocated_mb: u64,
    sizing: &JvmSizing,
    instance: &InstanceName,
    template: &LaunchTemplate,
) -> Result<LaunchCommand, CommandError> {
    let heap_mb = heap_size_mb(allocated_mb, sizing.overhead_mb, sizing.heap_ratio)?;

    let mut args = Vec::with_capacity(template.jvm_args.len() + 6);
    args.push(format!("-Xmx{heap_mb}M"));
    args.extend(template.jvm_args.iter().cloned());
    args.push(template.main_class.clone());
    args.push("--app_name".to_string());
    args.push(template.app_name.clone());
    args.push("--instance_name".to_string());
    args.push(instance.to_string());

    Ok(LaunchCommand {
        program: template.java_bin.clone(),
        args,
        heap_mb,
        stdout_path: format!("{}/{}.stdout", template.log_dir, instance),
        stderr_path: format!("{}/{}.stderr", template.log_dir, instance),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn name(s: &str) -> InstanceName {
        InstanceName::parse(s).unwrap()
    }

    #[test]
    fn test_worked_example_heap() {
        let sizing = JvmSizing {
            overhead_mb: 10,
            heap_ratio: 0.8,
        };
        let command = build_launch_command(
            2048,
            &sizing,
            &name("TaskRunner_1"),
            &LaunchTemplate::default(),
        )
        .unwrap();

        assert_eq!(command.heap_mb, 1628);
        assert!(command.command_line().contains("-Xmx1628"));
    }

    #[rstest]
    #[case(1024, 0, 1.0, 1024)]
    #[case(2048, 10, 0.8, 1628)]
    #[case(1000, 0, 0.25, 250)]
    #[case(4096, 512, 0.75, 2560)]
    fn test_heap_truncates(
        #[case] allocated: u64,
        #[case] overhead: u64,
        #[case] ratio: f64,
        #[case] expected: u64,
    ) {
        assert_eq!(heap_size_mb(allocated, overhead, ratio).unwrap(), expected);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-0.5)]
    #[case(1.01)]
    #[case(f64::NAN)]
    fn test_invalid_ratio(#[case] ratio: f64) {
        assert!(matches!(
            heap_size_mb(1024, 0, ratio),
            Err(CommandError::InvalidRatio(_))
        ));
    }

    #[test]
    fn test_non_positive_heap_is_config_error() {
        let err = heap_size_mb(128, 128, 1.0).unwrap_err();
        assert!(matches!(err, CommandError::NonPositiveHeap { heap_mb: 0, .. }));

        let err = heap_size_mb(100, 200, 0.5).unwrap_err();
        assert!(matches!(err, CommandError::NonPositiveHeap { heap_mb: -150, .. }));
    }

    #[test]
    fn test_huge_overhead_is_rejected() {
        let err = heap_size_mb(2048, u64::MAX, 1.0).unwrap_err();
        assert!(matches!(
            err,
            CommandError::NonPositiveHeap { overhead_mb: u64::MAX, heap_mb: i64::MIN, .. }
        ));

        let err = heap_size_mb(2048, i64::MAX as u64 + 1, 1.0).unwrap_err();
        assert!(matches!(err, CommandError::NonPositiveHeap { .. }));
    }

    #[test]
    fn test_command_embeds_instance_identity() {
        let template = LaunchTemplate {
            java_bin: "java".to_string(),
            jvm_args: vec!["-XX:+UseG1GC".to_string()],
            main_class: "Worker".to_string(),
            app_name: "testApp".to_string(),
            log_dir: "/logs".to_string(),
        };
        let command =
            build_launch_command(1024, &JvmSizing::default(), &name("YarnTaskRunner_3"), &template)
                .unwrap();

        assert_eq!(
            command.command_line(),
            "java -Xmx1024M -XX:+UseG1GC Worker --app_name testApp \
             --instance_name YarnTaskRunner_3 \
             1>/logs/YarnTaskRunner_3.stdout 2>/logs/YarnTaskRunner_3.stderr"
        );
    }

    proptest! {
        #[test]
        fn heap_never_exceeds_scaled_allocation(
            allocated in 1u64..65536,
            overhead in 0u64..1024,
            ratio in 0.01f64..=1.0,
        ) {
            let scaled = (allocated as f64 * ratio).floor() as i64;
            match heap_size_mb(allocated, overhead, ratio) {
                Ok(heap) => prop_assert_eq!(heap as i64, scaled - overhead as i64),
                Err(CommandError::NonPositiveHeap { heap_mb, .. }) => prop_assert!(heap_mb <= 0),
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
        }
    }
}
