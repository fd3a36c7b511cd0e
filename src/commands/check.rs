//! Check-requirements command implementation.
//!
//! Validates privileges and host access for the configured kernel backend.

use crate::config::{validate_effective_config, Config};
use crate::startup_checks::validate_requirements;

/// Validates runtime requirements and configuration.
pub fn command_check_requirements(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Checking Runtime Requirements");
    println!("================================\n");

    let mut all_ok = true;

    println!("⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n🖥️  Checking host access...");
    match crate::build_kernel(config) {
        Ok(kernel) => {
            let simulated = config.test_data_file.is_some();
            match validate_requirements(kernel.as_ref(), simulated) {
                Ok(_) => println!("   ✅ Processor sets readable"),
                Err(e) => {
                    println!("   ❌ {}", e);
                    all_ok = false;
                }
            }
        }
        Err(e) => {
            println!("   ❌ No kernel backend: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All requirements met - ready for production!");
        Ok(())
    } else {
        println!("   ❌ Requirements check failed - please review the output above");
        std::process::exit(1);
    }
}
