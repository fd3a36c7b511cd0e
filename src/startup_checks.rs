//! Startup requirement validation for taskshare.
//!
//! This module validates that the service has the privileges and kernel
//! access it needs before the first refresh pass.

use nix::unistd::geteuid;
use taskshare::kernel::{HostKernel, KernelError};
use tracing::{error, info, warn};

/// Validate all runtime requirements against the selected kernel backend.
pub fn validate_requirements(kernel: &dyn HostKernel, simulated: bool) -> Result<(), ValidationError> {
    info!("🔍 Validating runtime requirements...");

    if simulated {
        info!("✅ Simulated host - privilege checks skipped");
    } else {
        check_user_privileges();
    }
    check_host_access(kernel)?;

    info!("✅ All runtime requirements validated");
    Ok(())
}

/// Check if running with sufficient privileges
fn check_user_privileges() {
    if !geteuid().is_root() {
        warn!("⚠️  Not running as root - the host processor sets will be refused");
        warn!("   Recommendation: run taskshare with sudo or as a root launchd daemon");
    } else {
        info!("✅ Running as root (uid=0)");
    }
}

/// Obtain and release every processor set once.
fn check_host_access(kernel: &dyn HostKernel) -> Result<(), ValidationError> {
    match kernel.processor_sets() {
        Ok(sets) => {
            let count = sets.len();
            for pset in sets {
                kernel.release_processor_set(pset);
            }
            info!("✅ Host access: {} processor set(s) readable", count);
            if count == 0 {
                warn!("⚠️  Host reports no processor sets - passes will be empty");
            }
            Ok(())
        }
        Err(KernelError::InsufficientPrivileges) => {
            error!("❌ Cannot obtain the privileged host handle");
            error!("   Only root may list the tasks of a processor set.");
            error!("");
            error!("   Solutions:");
            error!("   1. Run as root:");
            error!("      sudo taskshare");
            error!("   2. Run offline against a host snapshot:");
            error!("      taskshare generate-testdata -o host.json && taskshare -t host.json");
            Err(ValidationError::InsufficientPermissions(
                "host_processor_set_priv refused".to_string(),
            ))
        }
        Err(e) => Err(ValidationError::HostUnavailable(e)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("Host kernel unavailable: {0}")]
    HostUnavailable(#[source] KernelError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskshare::kernel::simulated::HostSnapshot;
    use taskshare::kernel::SimulatedKernel;

    #[test]
    fn test_simulated_host_passes() {
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![]));
        assert!(validate_requirements(&kernel, true).is_ok());
        assert_eq!(kernel.outstanding_handles(), 0);
    }

    #[test]
    fn test_denied_host_fails() {
        let kernel = SimulatedKernel::new(HostSnapshot {
            host_denied: true,
            ..HostSnapshot::default()
        });
        assert!(matches!(
            validate_requirements(&kernel, true),
            Err(ValidationError::InsufficientPermissions(_))
        ));
    }
}
