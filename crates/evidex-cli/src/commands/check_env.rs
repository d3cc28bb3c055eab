//! `evidex check-env` — verify required environment variables. Prints
//! fingerprints only, never values.

use evidex_common::env::check_env;

const REQUIRED: &[&str] = &["DATABASE_URL", "EMBEDDING_API_KEY"];

pub fn run() -> anyhow::Result<i32> {
    let report = check_env();
    let mut missing_required = false;

    println!("{:<20} {:<10} fingerprint", "variable", "status");
    for (name, set, fingerprint) in &report {
        let required = REQUIRED.contains(name);
        let status = match (*set, required) {
            (true, _) => "set",
            (false, true) => {
                missing_required = true;
                "MISSING"
            }
            (false, false) => "unset",
        };
        println!("{name:<20} {status:<10} {fingerprint}");
    }

    if missing_required {
        println!("\nrequired variables are missing; see .env.example");
        Ok(1)
    } else {
        println!("\nenvironment ok");
        Ok(0)
    }
}
