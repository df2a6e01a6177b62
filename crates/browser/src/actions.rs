//! Coordinate- and text-based interaction primitives.
//!
//! Thin callers of the two session handles; all lifecycle work happens
//! inside the accessors they go through. Arguments travel as structured
//! payloads, never as strings spliced into scripts.

use serde_json::{json, Value};
use webbridge_core::Result;

use crate::manager::BridgeSession;

impl BridgeSession {
    /// Click at viewport coordinates.
    pub async fn click(&self, x: f64, y: f64) -> Result<String> {
        let client = self.client().await?;
        let out = client
            .call_tool("browser_click", json!({ "x": x, "y": y }))
            .await?;
        Ok(out.text())
    }

    /// Type text into the focused element.
    pub async fn type_text(&self, text: &str) -> Result<String> {
        let client = self.client().await?;
        let out = client
            .call_tool("browser_type", json!({ "text": text }))
            .await?;
        Ok(out.text())
    }

    /// Press-drag-release from one point to another.
    pub async fn drag(&self, from: (f64, f64), to: (f64, f64)) -> Result<String> {
        let client = self.client().await?;
        let out = client
            .call_tool(
                "browser_drag",
                json!({
                    "fromX": from.0,
                    "fromY": from.1,
                    "toX": to.0,
                    "toY": to.1,
                }),
            )
            .await?;
        Ok(out.text())
    }

    /// Scroll by pixel deltas.
    pub async fn scroll(&self, dx: f64, dy: f64) -> Result<String> {
        let client = self.client().await?;
        let out = client
            .call_tool("browser_scroll", json!({ "deltaX": dx, "deltaY": dy }))
            .await?;
        Ok(out.text())
    }

    /// Run `function` in the page with `args` bound driver-side.
    pub async fn evaluate(&self, function: &str, args: Value) -> Result<Value> {
        let page = self.page().await?;
        page.evaluate(function, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockAllocator, MockDriver, MockRegistry};
    use std::sync::Arc;
    use webbridge_core::Config;

    fn session_with_registry() -> (Arc<MockRegistry>, BridgeSession) {
        let registry = Arc::new(MockRegistry::new());
        let s = BridgeSession::with_collaborators(
            Config::default(),
            Arc::new(MockAllocator::fixed(54213)),
            Arc::new(MockDriver::new()),
            registry.clone(),
        );
        (registry, s)
    }

    #[tokio::test]
    async fn test_click_sends_structured_coordinates() {
        let (registry, s) = session_with_registry();
        let text = s.click(10.0, 20.0).await.unwrap();
        assert_eq!(text, "ok");

        let client = registry.client("browser-54213").unwrap();
        let calls = client.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "browser_click");
        assert_eq!(calls[0].1, json!({ "x": 10.0, "y": 20.0 }));
    }

    #[tokio::test]
    async fn test_drag_sends_both_endpoints() {
        let (registry, s) = session_with_registry();
        s.drag((1.0, 2.0), (3.0, 4.0)).await.unwrap();

        let client = registry.client("browser-54213").unwrap();
        let calls = client.recorded_calls();
        assert_eq!(calls[0].0, "browser_drag");
        assert_eq!(
            calls[0].1,
            json!({ "fromX": 1.0, "fromY": 2.0, "toX": 3.0, "toY": 4.0 })
        );
    }

    #[tokio::test]
    async fn test_evaluate_goes_through_the_page() {
        let (_, s) = session_with_registry();
        let result = s
            .evaluate("(args) => args.a + 1", json!({ "a": 1 }))
            .await
            .unwrap();
        // The mock page echoes the call; the real one binds args driver-side.
        assert_eq!(result["function"], "(args) => args.a + 1");
        assert_eq!(result["args"], json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn test_primitives_share_one_lifecycle() {
        let (registry, s) = session_with_registry();
        s.click(1.0, 1.0).await.unwrap();
        s.type_text("hello").await.unwrap();
        s.scroll(0.0, 400.0).await.unwrap();
        assert_eq!(registry.registrations(), 1);
    }
}
