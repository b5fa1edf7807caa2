use queue_dispatch_worker::{handler_fn, HandlerResult, MessageHandler, Subscriber, SubscriberConfig};
use async_trait::async_trait;
use serde::Deserialize;

/// Custom handler for signup notifications
struct SignupHandler;

#[async_trait]
impl MessageHandler for SignupHandler {
    async fn handle(&self, message: String) -> HandlerResult {
        #[derive(Deserialize)]
        struct Signup {
            user_id: String,
            email: String,
        }

        let signup: Signup = serde_json::from_str(&message)?;
        println!("Welcome mail for user {} to {}", signup.user_id, signup.email);

        // Simulate sending
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = SubscriberConfig {
        store_url: "redis://127.0.0.1:6379".to_string(),
        poll_timeout_ms: 500,
        ..Default::default()
    };

    let subscriber = Subscriber::redis(config);
    subscriber.subscribe("signups").handle(SignupHandler)?;
    subscriber.subscribe("audit").handle(handler_fn(|message: String| async move {
        println!("audit: {}", message);
        Ok(())
    }))?;

    println!("Listening on:");
    for queue in subscriber.registry().queue_names() {
        println!("  - {}", queue);
    }

    subscriber
        .run_until(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
