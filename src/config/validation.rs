//! Configuration validation logic
//!
//! Validation runs after loading and reports the first offending field by
//! its path, e.g. `schedulers[0].tasks[1].expression`.

use std::collections::HashSet;

use crate::config::error::ConfigError;
use crate::config::settings::{
    FileSettings, LoggerSettings, SchedulerDefinition, Settings, StoreBackend, StoreSettings,
    TaskDefinition, WorkerSettings,
};
use crate::jobs::Trigger;
use crate::logger::parse_level;

const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

impl FileSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file logging is enabled.",
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.file.format",
                format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// # Validation Rules
    /// - Level must be a level name or an `EnvFilter` directive
    /// - If file logging is enabled, path must not be empty
    /// - Log format must be one of: full, compact, json
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_level(&self.level).map_err(|e| ConfigError::validation("logger.level", e.to_string()))?;
        self.file.validate()?;

        if !self.console.enabled && !self.file.enabled {
            return Err(ConfigError::validation(
                "logger",
                "At least one output (console or file) must be enabled.",
            ));
        }
        Ok(())
    }
}

impl WorkerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "worker.poll_interval_ms",
                "Poll interval must be greater than 0 milliseconds.",
            ));
        }
        if self.limit == Some(0) {
            return Err(ConfigError::validation("worker.limit", "Limit must be greater than 0."));
        }
        if self.time_limit_secs == Some(0) {
            return Err(ConfigError::validation(
                "worker.time_limit_secs",
                "Time limit must be greater than 0 seconds.",
            ));
        }
        if self.failure_limit == Some(0) {
            return Err(ConfigError::validation(
                "worker.failure_limit",
                "Failure limit must be greater than 0.",
            ));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(ConfigError::validation(
                "worker.command_timeout_secs",
                "Command timeout must be greater than 0 seconds.",
            ));
        }
        if self.shell.trim().is_empty() {
            return Err(ConfigError::validation("worker.shell", "Shell cannot be empty."));
        }
        Ok(())
    }
}

impl StoreSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StoreBackend::File && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "store.path",
                "Store path is required by the file backend.",
            ));
        }
        Ok(())
    }
}

impl TaskDefinition {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation(format!("{}.name", field), "Task name cannot be empty."));
        }
        Trigger::parse(&self.expression)
            .map_err(|e| ConfigError::invalid_task(format!("{}.expression", field), e))?;
        Ok(())
    }
}

impl SchedulerDefinition {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation(
                format!("{}.name", field),
                "Scheduler name cannot be empty.",
            ));
        }

        let mut names = HashSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            let field = format!("{}.tasks[{}]", field, index);
            task.validate(&field)?;
            if !names.insert(task.name.as_str()) {
                return Err(ConfigError::validation(
                    format!("{}.name", field),
                    format!("Task '{}' is defined twice in scheduler '{}'.", task.name, self.name),
                ));
            }
        }
        Ok(())
    }
}

impl Settings {
    /// Validate all sections, returning the first error encountered
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logger.validate()?;
        self.worker.validate()?;
        self.store.validate()?;

        let mut names = HashSet::new();
        for (index, scheduler) in self.schedulers.iter().enumerate() {
            let field = format!("schedulers[{}]", index);
            scheduler.validate(&field)?;
            if !names.insert(scheduler.name.as_str()) {
                return Err(ConfigError::validation(
                    format!("{}.name", field),
                    format!("Scheduler '{}' is defined twice.", scheduler.name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } | ConfigError::InvalidTask { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_logger_settings_levels() {
        for level in ["trace", "debug", "INFO", "warn", "error", "cadence=debug,info"] {
            let settings = LoggerSettings {
                level: level.to_string(),
                ..Default::default()
            };
            assert!(settings.validate().is_ok(), "Level should be valid: {}", level);
        }

        let invalid = LoggerSettings {
            level: "chatty".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(invalid.validate().unwrap_err()), "logger.level");
    }

    #[test]
    fn test_logger_settings_file_checks() {
        let empty_path = LoggerSettings {
            file: FileSettings {
                enabled: true,
                path: " ".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(field_of(empty_path.validate().unwrap_err()), "logger.file.path");

        let disabled_empty_path = LoggerSettings {
            file: FileSettings {
                enabled: false,
                path: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(disabled_empty_path.validate().is_ok());

        let bad_format = LoggerSettings {
            file: FileSettings {
                format: "yaml".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(field_of(bad_format.validate().unwrap_err()), "logger.file.format");
    }

    #[test]
    fn test_worker_settings_zero_values() {
        let cases = [
            (WorkerSettings { poll_interval_ms: 0, ..Default::default() }, "worker.poll_interval_ms"),
            (WorkerSettings { limit: Some(0), ..Default::default() }, "worker.limit"),
            (WorkerSettings { time_limit_secs: Some(0), ..Default::default() }, "worker.time_limit_secs"),
            (WorkerSettings { failure_limit: Some(0), ..Default::default() }, "worker.failure_limit"),
            (WorkerSettings { shell: String::new(), ..Default::default() }, "worker.shell"),
        ];
        for (settings, field) in cases {
            assert_eq!(field_of(settings.validate().unwrap_err()), field);
        }
    }

    #[test]
    fn test_store_settings() {
        let memory = StoreSettings {
            backend: StoreBackend::Memory,
            path: String::new(),
        };
        assert!(memory.validate().is_ok());

        let file = StoreSettings {
            backend: StoreBackend::File,
            path: String::new(),
        };
        assert_eq!(field_of(file.validate().unwrap_err()), "store.path");
    }

    #[test]
    fn test_scheduler_definitions() {
        let settings = Settings {
            schedulers: vec![
                SchedulerDefinition::new("foo", vec![TaskDefinition::new("a", "@hourly")]),
                SchedulerDefinition::new(
                    "bar",
                    vec![
                        TaskDefinition::new("a", "every 5 minutes"),
                        TaskDefinition::new("b", "every blue moon"),
                    ],
                ),
            ],
            ..Default::default()
        };
        assert_eq!(
            field_of(settings.validate().unwrap_err()),
            "schedulers[1].tasks[1].expression"
        );

        let duplicated = Settings {
            schedulers: vec![SchedulerDefinition::new(
                "foo",
                vec![TaskDefinition::new("a", "@hourly"), TaskDefinition::new("a", "@daily")],
            )],
            ..Default::default()
        };
        assert_eq!(field_of(duplicated.validate().unwrap_err()), "schedulers[0].tasks[1].name");

        let twice = Settings {
            schedulers: vec![
                SchedulerDefinition::new("foo", vec![]),
                SchedulerDefinition::new("foo", vec![]),
            ],
            ..Default::default()
        };
        assert_eq!(field_of(twice.validate().unwrap_err()), "schedulers[1].name");
    }
}
