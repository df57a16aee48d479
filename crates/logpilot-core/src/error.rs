use thiserror::Error;

/// Errors produced while reconciling container log configurations.
///
/// Per-container compile errors carry the exact phrasing surfaced to
/// operators in logs; the reconciliation loop logs them and moves on to the
/// next container.
#[derive(Debug, Error)]
pub enum PilotError {
    /// Sentinel returned by `Shipper::start` when the subprocess is already
    /// running. The reconciliation loop treats this as success.
    #[error("already started")]
    AlreadyStarted,

    #[error("{0} is not a valid k=v format")]
    InvalidTag(String),

    #[error("path for {0} is empty")]
    EmptyPath(String),

    #[error("{path} must be absolute path, for {name}")]
    RelativePath { name: String, path: String },

    #[error("{path} must be a file path, not directory, for {name}")]
    NotAFile { name: String, path: String },

    #[error("in log {name}: {path} is not mount on host")]
    NotMounted { name: String, path: String },

    /// A `<prefix>.logs.a.b` label arrived before any `<prefix>.logs.a`
    /// label defined the parent.
    #[error("{0} has no parent node")]
    OrphanLabel(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("render error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("container API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("signal error: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_phrasing() {
        let err = PilotError::NotMounted {
            name: "app".to_string(),
            path: "/nowhere/app.log".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "in log app: /nowhere/app.log is not mount on host"
        );

        let err = PilotError::InvalidTag("a=".to_string());
        assert_eq!(err.to_string(), "a= is not a valid k=v format");

        let err = PilotError::OrphanLabel("app".to_string());
        assert_eq!(err.to_string(), "app has no parent node");
    }

    #[test]
    fn test_already_started_sentinel() {
        assert_eq!(PilotError::AlreadyStarted.to_string(), "already started");
    }
}
