//! Compile errors

use thiserror::Error;

/// Errors raised while compiling a cluster. Any error discards the whole cluster.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// An HTTPS listener attached to the load balancer without certificates
    #[error("Certificate ARN required for HTTPS listener on port {port} of service '{service}'")]
    MissingCertificate { service: String, port: u16 },

    /// Two listeners on the same cluster port declare different ALB protocols
    #[error(
        "Service {service} on cluster {cluster}, listener {protocol} is colliding with a {existing} listener of another service on port {port}"
    )]
    PortProtocolConflict {
        service: String,
        cluster: String,
        port: u16,
        protocol: String,
        existing: String,
    },

    #[error("Missing required field '{field}' in {context}")]
    MissingField { context: String, field: String },

    #[error("Invalid configuration for {context}: {message}")]
    InvalidConfig { context: String, message: String },

    /// Two components produced the same resource key
    #[error("Duplicate resource '{0}' in compiled graph")]
    DuplicateResource(String),

    /// Two components produced the same output key
    #[error("Duplicate output '{0}' in compiled graph")]
    DuplicateOutput(String),

    /// A resource references a logical id that is not part of the graph
    #[error("Resource '{from}' references unknown resource '{target}'")]
    DanglingReference { from: String, target: String },

    #[error("Circular dependency detected between generated resources")]
    DependencyCycle,

    /// A listener rule targets a port the load balancer has no listener for
    #[error("No load balancer listener for port {port} of service '{service}'")]
    UnknownListenerPort { service: String, port: u16 },
}

impl CompileError {
    pub fn missing_field(context: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            context: context.into(),
            field: field.into(),
        }
    }

    pub fn invalid(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            context: context.into(),
            message: message.into(),
        }
    }

    /// True for programmer errors (the configuration was valid but the
    /// generated graph is inconsistent)
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateResource(_)
                | Self::DuplicateOutput(_)
                | Self::DanglingReference { .. }
                | Self::DependencyCycle
                | Self::UnknownListenerPort { .. }
        )
    }
}

/// Result type for compile operations
pub type CompileResult<T> = Result<T, CompileError>;
