//! User signup as a durable workflow: create the user, send a (flaky)
//! welcome email, wait five seconds, then send the onboarding email.
//!
//! Run with an email argument to watch a run succeed, or pass one without
//! an `@` to watch the onboarding step fail fatally:
//!
//! ```text
//! cargo run --example user_signup -- a@b.com
//! cargo run --example user_signup -- bad-email
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tsuzuri::prelude::*;
use ulid::Ulid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: String,
    email: String,
}

fn user_signup() -> Result<WorkflowDefinition, WorkflowError> {
    WorkflowDefinition::builder("user-signup")
        .step("create-user", |ctx| async move {
            let email: String = ctx.input_as()?;
            let user = User {
                id: Ulid::new().to_string(),
                email,
            };
            tracing::info!(user_id = %user.id, email = %user.email, "created user");
            Ok(serde_json::to_value(user)?)
        })
        .step("welcome-email", |ctx| async move {
            let user: User = ctx.output_as("create-user")?;
            // Roughly a third of sends hit a simulated network error, so
            // most runs exercise the retry path.
            if rand::thread_rng().gen_bool(0.3) {
                return Err(StepError::retryable("network error sending welcome email"));
            }
            tracing::info!(email = %user.email, "welcome email sent");
            Ok(json!("sent"))
        })
        .sleep("5s")
        .step("onboarding-email", |ctx| async move {
            let user: User = ctx.output_as("create-user")?;
            if !user.email.contains('@') {
                return Err(StepError::fatal("invalid email address"));
            }
            tracing::info!(email = %user.email, "onboarding email sent");
            Ok(json!("sent"))
        })
        .finish(|ctx| {
            let user_id = ctx
                .output("create-user")
                .and_then(|user| user.get("id"))
                .cloned()
                .unwrap_or_default();
            json!({ "userId": user_id, "status": "onboarded" })
        })
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let email = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "a@b.com".to_string());

    let engine = Arc::new(Engine::builder().workflow(user_signup()?).build()?);
    let poller = engine.spawn_timer_loop(Duration::from_millis(250));

    let run_id = engine.start("user-signup", json!(email)).await?;
    println!("started user-signup run {run_id} for {email}");

    loop {
        let run = engine.run_state(run_id).await?;
        if run.status.is_terminal() {
            match run.status {
                RunStatus::Succeeded => {
                    println!("run succeeded: {}", run.output.unwrap_or_default());
                }
                status => {
                    println!(
                        "run ended {status:?}: {}",
                        run.failure.unwrap_or_else(|| "no reason recorded".to_string())
                    );
                }
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    poller.abort();
    Ok(())
}
