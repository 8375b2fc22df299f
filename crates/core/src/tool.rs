//! Tool classification and dispatch.
//!
//! Recipients form a closed vocabulary: `browser.*` methods, the python
//! interpreter, and the `functions.apply_patch` function. Anything else is a
//! hard error — an unknown recipient means the model asked for a capability
//! this driver does not have, and silently dropping the call would leave the
//! conversation wedged waiting for a tool result that never comes.
//!
//! The router owns envelope normalization: capabilities return bare output
//! strings and the router stamps them into tool-role messages addressed back
//! to the assistant, carrying the calling message's channel forward.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::Message;

/// The closed set of tool families a recipient can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolClass {
    Browser,
    Python,
    ApplyPatch,
}

impl ToolClass {
    /// Classify a recipient string. `None` means the recipient is outside
    /// the known vocabulary entirely.
    pub fn classify(recipient: &str) -> Option<ToolClass> {
        if recipient.starts_with("browser.") {
            Some(ToolClass::Browser)
        } else if recipient.starts_with("python") {
            Some(ToolClass::Python)
        } else if recipient == "functions.apply_patch" {
            Some(ToolClass::ApplyPatch)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolClass::Browser => "browser",
            ToolClass::Python => "python",
            ToolClass::ApplyPatch => "apply_patch",
        }
    }
}

/// A tool capability: executes one call message and returns its raw output
/// strings. Execution failures are data — a capability returns `Err` only
/// for faults the model could not act on (the router turns those into
/// textual results too, so from the session's view dispatch never fails
/// once the recipient is recognized).
#[async_trait]
pub trait ToolCapability: Send + Sync {
    /// The tool family this capability serves.
    fn class(&self) -> ToolClass;

    /// Execute the call and return output strings, one per result message.
    async fn invoke(&self, call: &Message) -> Result<Vec<String>, ToolError>;
}

/// Routes tool-call messages to registered capabilities.
pub struct ToolRouter {
    capabilities: HashMap<ToolClass, Box<dyn ToolCapability>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    pub fn register(&mut self, capability: Box<dyn ToolCapability>) {
        self.capabilities.insert(capability.class(), capability);
    }

    pub fn is_enabled(&self, class: ToolClass) -> bool {
        self.capabilities.contains_key(&class)
    }

    /// Dispatch a tool-call message. Returns the tool-result messages to
    /// append to the conversation.
    ///
    /// Errors only on recipients outside the vocabulary or naming a tool
    /// that is not enabled; a capability's own failure becomes the text of
    /// the result message so the model can read it and recover.
    pub async fn dispatch(&self, call: &Message) -> Result<Vec<Message>, ToolError> {
        let recipient = call
            .recipient
            .as_deref()
            .ok_or_else(|| ToolError::InvalidArguments("message has no recipient".into()))?;

        let class = ToolClass::classify(recipient)
            .ok_or_else(|| ToolError::UnknownRecipient(recipient.to_string()))?;

        let capability = self
            .capabilities
            .get(&class)
            .ok_or_else(|| ToolError::NotEnabled(class.as_str().to_string()))?;

        debug!(recipient, tool = class.as_str(), "Dispatching tool call");

        let outputs = match capability.invoke(call).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(tool = class.as_str(), error = %e, "Tool invocation failed");
                vec![format!("Error: {e}")]
            }
        };

        Ok(outputs
            .into_iter()
            .map(|text| {
                let mut message = Message::tool_output(recipient, text);
                message.channel = call.channel.clone();
                message
            })
            .collect())
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    struct EchoCapability(ToolClass);

    #[async_trait]
    impl ToolCapability for EchoCapability {
        fn class(&self) -> ToolClass {
            self.0
        }

        async fn invoke(&self, call: &Message) -> Result<Vec<String>, ToolError> {
            Ok(vec![format!("echo: {}", call.text())])
        }
    }

    struct FailingCapability(ToolClass);

    #[async_trait]
    impl ToolCapability for FailingCapability {
        fn class(&self) -> ToolClass {
            self.0
        }

        async fn invoke(&self, _call: &Message) -> Result<Vec<String>, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: self.0.as_str().into(),
                reason: "container exited".into(),
            })
        }
    }

    fn python_call(text: &str) -> Message {
        Message::assistant(text)
            .with_channel("commentary")
            .with_recipient("python")
    }

    #[test]
    fn recipient_classification() {
        assert_eq!(ToolClass::classify("browser.search"), Some(ToolClass::Browser));
        assert_eq!(ToolClass::classify("browser.open"), Some(ToolClass::Browser));
        assert_eq!(ToolClass::classify("python"), Some(ToolClass::Python));
        assert_eq!(
            ToolClass::classify("functions.apply_patch"),
            Some(ToolClass::ApplyPatch)
        );
        assert_eq!(ToolClass::classify("functions.other"), None);
        assert_eq!(ToolClass::classify("shell"), None);
    }

    #[tokio::test]
    async fn dispatch_stamps_tool_envelope() {
        let mut router = ToolRouter::new();
        router.register(Box::new(EchoCapability(ToolClass::Python)));

        let results = router.dispatch(&python_call("print(2+2)")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].role(), Role::Tool);
        assert_eq!(results[0].author.name.as_deref(), Some("python"));
        assert_eq!(results[0].recipient.as_deref(), Some("assistant"));
        assert_eq!(results[0].channel.as_deref(), Some("commentary"));
        assert_eq!(results[0].text(), "echo: print(2+2)");
    }

    #[tokio::test]
    async fn unknown_recipient_is_a_hard_error() {
        let router = ToolRouter::new();
        let call = Message::assistant("x").with_recipient("shell");
        let err = router.dispatch(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownRecipient(r) if r == "shell"));
    }

    #[tokio::test]
    async fn recognized_but_disabled_is_a_hard_error() {
        let router = ToolRouter::new();
        let err = router.dispatch(&python_call("1")).await.unwrap_err();
        assert!(matches!(err, ToolError::NotEnabled(t) if t == "python"));
    }

    #[tokio::test]
    async fn capability_failure_becomes_result_text() {
        let mut router = ToolRouter::new();
        router.register(Box::new(FailingCapability(ToolClass::Python)));

        let results = router.dispatch(&python_call("1/0")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].text().starts_with("Error:"));
        assert!(results[0].text().contains("container exited"));
    }
}
