use std::error::Error;
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn Error>> {
    // Git sha from the local repository, or from `GIT_SHA` when building outside of a checkout
    let git = EmitBuilder::builder().fail_on_error().git_sha(false).emit();
    if git.is_err() {
        if let Ok(sha) = std::env::var("GIT_SHA") {
            println!("cargo:rustc-env=VERGEN_GIT_SHA={sha}");
        }
    }

    if let Ok(label) = std::env::var("DOCKER_LABEL") {
        println!("cargo:rustc-env=DOCKER_LABEL={label}");
    }
    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-env-changed=DOCKER_LABEL");

    Ok(())
}
