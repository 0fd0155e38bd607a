use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use super::{cursor_params, decode_result};
use crate::error::Result;
use crate::protocol::{GetPromptResult, ListPromptsResult, Page, Prompt, methods};
use crate::session::Session;

/// `prompts/*` façade.
pub struct Prompts {
    session: Arc<Session>,
}

impl Prompts {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// One page of prompt templates.
    pub fn list(&self, cursor: Option<&str>) -> Result<Page<Prompt>> {
        let value = self
            .session
            .send_request(methods::PROMPTS_LIST, cursor_params(cursor))?;
        let result: ListPromptsResult = decode_result(methods::PROMPTS_LIST, value)?;
        Ok(Page {
            items: result.prompts,
            next_cursor: result.next_cursor,
        })
    }

    /// Render a prompt with the given arguments.
    pub fn get(&self, name: &str, arguments: &HashMap<String, String>) -> Result<GetPromptResult> {
        let mut params = json!({ "name": name });
        if !arguments.is_empty() {
            params["arguments"] = json!(arguments);
        }
        let value = self
            .session
            .send_request(methods::PROMPTS_GET, Some(params))?;
        decode_result(methods::PROMPTS_GET, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::protocol::{LATEST_PROTOCOL_VERSION, Role};
    use crate::session::SessionOptions;
    use crate::testing::MockTransport;

    #[test]
    fn test_list_and_get() {
        let mock = MockTransport::server(LATEST_PROTOCOL_VERSION, |method, params| match method {
            "prompts/list" => Ok(json!({
                "prompts": [{
                    "name": "greet",
                    "arguments": [{"name": "who", "required": true}]
                }]
            })),
            "prompts/get" => {
                let who = params
                    .and_then(|p| p["arguments"]["who"].as_str())
                    .unwrap_or("nobody");
                Ok(json!({
                    "description": "A greeting",
                    "messages": [{
                        "role": "user",
                        "content": {"type": "text", "text": format!("Hello, {}!", who)}
                    }]
                }))
            }
            _ => Ok(json!({})),
        });
        let session = Arc::new(Session::new(
            mock,
            TransportConfig::default(),
            SessionOptions::default(),
        ));
        session.initialize().unwrap();
        let prompts = Prompts::new(session);

        let page = prompts.list(None).unwrap();
        assert_eq!(page.items[0].name, "greet");
        assert_eq!(page.items[0].arguments[0].required, Some(true));

        let mut args = HashMap::new();
        args.insert("who".to_string(), "Ada".to_string());
        let rendered = prompts.get("greet", &args).unwrap();
        assert_eq!(rendered.messages[0].role, Role::User);
        assert_eq!(rendered.messages[0].content.as_text(), Some("Hello, Ada!"));
    }
}
