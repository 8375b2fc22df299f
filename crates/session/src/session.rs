//! The session: one conversation, one token source, one tool router.
//!
//! State is implicit in the conversation tail: a last message with no
//! recipient means the user speaks next; a recipient means a tool must run
//! before generation resumes. There is exactly one mutator of the
//! conversation, so the whole loop is a single logical thread of control.

use tracing::{debug, info, warn};

use colloquy_core::encoding::{
    render_conversation_for_completion, stop_tokens_for_assistant_turn, Marker, ENCODING_NAME,
};
use colloquy_core::parser::ParsePhase;
use colloquy_core::{
    Conversation, Error, Message, SourceError, StreamParser, TokenSource, ToolRouter,
};

use crate::observer::TurnObserver;

const DEFAULT_MAX_TOOL_ITERATIONS: usize = 25;

pub struct Session {
    source: Box<dyn TokenSource>,
    router: ToolRouter,
    conversation: Conversation,
    max_tool_iterations: usize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("source", &self.source.name())
            .field("max_tool_iterations", &self.max_tool_iterations)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session over a source and router, seeding the conversation
    /// with the system message and optional developer message.
    ///
    /// Refuses a source whose token encoding differs from the parser's: the
    /// two share one vocabulary or nothing works.
    pub fn new(
        source: Box<dyn TokenSource>,
        router: ToolRouter,
        system_message: Message,
        developer_message: Option<Message>,
    ) -> Result<Self, Error> {
        if source.encoding_name() != ENCODING_NAME {
            return Err(SourceError::EncodingMismatch {
                expected: ENCODING_NAME.to_string(),
                actual: source.encoding_name().to_string(),
            }
            .into());
        }

        let mut conversation = Conversation::new();
        conversation.push(system_message);
        if let Some(developer) = developer_message {
            conversation.push(developer);
        }

        info!(backend = source.name(), "Session ready");

        Ok(Self {
            source,
            router,
            conversation,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        })
    }

    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Append a user message and drive generation and tool dispatch until
    /// the assistant addresses the user again.
    pub async fn process_user_message(
        &mut self,
        text: &str,
        observer: &mut dyn TurnObserver,
    ) -> Result<(), Error> {
        self.conversation.push(Message::user(text));

        let mut iterations = 0;
        loop {
            self.run_turn(observer).await?;

            let Some(last) = self.conversation.last() else {
                break;
            };
            if last.recipient.is_none() {
                break;
            }

            iterations += 1;
            if iterations > self.max_tool_iterations {
                warn!(iterations, "Tool iteration guard tripped");
                return Err(Error::Internal(format!(
                    "tool chain exceeded {} iterations",
                    self.max_tool_iterations
                )));
            }

            let call = last.clone();
            let results = self.router.dispatch(&call).await?;
            for message in results {
                observer.on_message_complete(&message);
                self.conversation.push(message);
            }
        }

        Ok(())
    }

    /// One generation turn: render, stream through a fresh parser, apply
    /// synthetic termination, append completed messages.
    async fn run_turn(&mut self, observer: &mut dyn TurnObserver) -> Result<(), Error> {
        let context = render_conversation_for_completion(&self.conversation);
        let stop = stop_tokens_for_assistant_turn();

        debug!(context_tokens = context.len(), "Starting generation turn");

        let mut rx = self.source.generate(context, stop).await;
        let mut parser = StreamParser::assistant_turn();
        let mut announced = false;

        while let Some(token) = rx.recv().await {
            observer.on_token(token);
            let completed = parser.process(token)?;

            if !announced && parser.phase() == ParsePhase::Content {
                announced = true;
                observer.on_message_start(
                    parser.current_channel().as_deref(),
                    parser.current_recipient().as_deref(),
                );
            }
            let delta = parser.last_content_delta();
            if !delta.is_empty() {
                let delta = delta.to_string();
                observer.on_content_delta(&delta);
            }
            if completed {
                announced = false;
                if let Some(message) = parser.messages().last() {
                    observer.on_message_complete(message);
                }
            }
        }

        // The stream ended, terminator or not. One synthetic end marker
        // finalizes any in-flight message; at a message boundary it is a
        // no-op, so this is idempotent.
        if parser.process(Marker::End.token())? {
            if let Some(message) = parser.messages().last() {
                observer.on_message_complete(message);
            }
        }

        for message in parser.take_messages() {
            self.conversation.push(message);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_core::encoding::{encode_with_special_tokens, Token, TokenSet};
    use colloquy_core::{Role, ToolCapability, ToolClass, ToolError};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::observer::NullObserver;
    use crate::prompt::{build_system_message, PromptOptions};

    /// Replays canned completions, one per generate call.
    struct ScriptedSource {
        turns: Mutex<Vec<Vec<Token>>>,
    }

    impl ScriptedSource {
        fn new(scripts: &[&str]) -> Self {
            Self {
                turns: Mutex::new(
                    scripts
                        .iter()
                        .rev()
                        .map(|s| encode_with_special_tokens(s))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl TokenSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn encoding_name(&self) -> &str {
            ENCODING_NAME
        }

        async fn generate(&self, _context: Vec<Token>, stop: TokenSet) -> mpsc::Receiver<Token> {
            let (tx, rx) = mpsc::channel(64);
            let tokens = self.turns.lock().unwrap().pop().unwrap_or_default();
            tokio::spawn(async move {
                for token in tokens {
                    if stop.contains(token) {
                        return;
                    }
                    if tx.send(token).await.is_err() {
                        return;
                    }
                }
            });
            rx
        }
    }

    struct MismatchedSource;

    #[async_trait]
    impl TokenSource for MismatchedSource {
        fn name(&self) -> &str {
            "mismatched"
        }

        fn encoding_name(&self) -> &str {
            "gpt2-bpe"
        }

        async fn generate(&self, _context: Vec<Token>, _stop: TokenSet) -> mpsc::Receiver<Token> {
            mpsc::channel(1).1
        }
    }

    struct EchoPython;

    #[async_trait]
    impl ToolCapability for EchoPython {
        fn class(&self) -> ToolClass {
            ToolClass::Python
        }

        async fn invoke(&self, call: &Message) -> Result<Vec<String>, ToolError> {
            assert_eq!(call.text(), "print(2+2)");
            Ok(vec!["4\n".to_string()])
        }
    }

    fn system() -> Message {
        build_system_message(&PromptOptions {
            reasoning: "low".into(),
            ..PromptOptions::default()
        })
    }

    fn session(scripts: &[&str], router: ToolRouter) -> Session {
        Session::new(Box::new(ScriptedSource::new(scripts)), router, system(), None).unwrap()
    }

    #[tokio::test]
    async fn plain_answer_turn() {
        let mut session = session(
            &["<|channel|>final<|message|>The answer is 4.<|return|>"],
            ToolRouter::new(),
        );
        session
            .process_user_message("What is 2+2?", &mut NullObserver)
            .await
            .unwrap();

        let last = session.conversation().last().unwrap();
        assert_eq!(last.role(), Role::Assistant);
        assert_eq!(last.channel.as_deref(), Some("final"));
        assert_eq!(last.text(), "The answer is 4.");
        assert!(last.recipient.is_none());
    }

    #[tokio::test]
    async fn tool_call_then_final_answer() {
        let mut router = ToolRouter::new();
        router.register(Box::new(EchoPython));
        let mut session = session(
            &[
                "<|channel|>commentary to=python<|message|>print(2+2)<|call|>",
                "<|channel|>final<|message|>It is 4.<|return|>",
            ],
            router,
        );
        session
            .process_user_message("compute 2+2 with python", &mut NullObserver)
            .await
            .unwrap();

        let messages = session.conversation().messages();
        // system, user, assistant call, tool result, assistant final
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].recipient.as_deref(), Some("python"));
        assert_eq!(messages[3].role(), Role::Tool);
        assert_eq!(messages[3].text(), "4\n");
        assert_eq!(messages[3].channel.as_deref(), Some("commentary"));
        assert_eq!(messages[4].text(), "It is 4.");
    }

    #[tokio::test]
    async fn truncated_stream_is_synthetically_terminated() {
        let mut session = session(
            &["<|channel|>final<|message|>partial answ"],
            ToolRouter::new(),
        );
        session
            .process_user_message("hi", &mut NullObserver)
            .await
            .unwrap();

        let last = session.conversation().last().unwrap();
        assert_eq!(last.text(), "partial answ");
        assert!(last.recipient.is_none());
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_assistant_message() {
        let mut session = session(&[""], ToolRouter::new());
        session
            .process_user_message("hi", &mut NullObserver)
            .await
            .unwrap();
        let last = session.conversation().last().unwrap();
        assert_eq!(last.role(), Role::Assistant);
        assert_eq!(last.text(), "");
    }

    #[tokio::test]
    async fn unknown_recipient_aborts_turn() {
        let mut session = session(
            &["<|channel|>commentary to=shell<|message|>ls<|call|>"],
            ToolRouter::new(),
        );
        let err = session
            .process_user_message("list files", &mut NullObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[tokio::test]
    async fn iteration_guard_stops_runaway_chain() {
        struct LoopingPython;

        #[async_trait]
        impl ToolCapability for LoopingPython {
            fn class(&self) -> ToolClass {
                ToolClass::Python
            }

            async fn invoke(&self, _call: &Message) -> Result<Vec<String>, ToolError> {
                Ok(vec!["again".to_string()])
            }
        }

        let script = "<|channel|>commentary to=python<|message|>x<|call|>";
        let scripts: Vec<&str> = std::iter::repeat_n(script, 10).collect();
        let mut router = ToolRouter::new();
        router.register(Box::new(LoopingPython));
        let mut session = session(&scripts, router).with_max_tool_iterations(3);

        let err = session
            .process_user_message("loop forever", &mut NullObserver)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3 iterations"));
    }

    #[tokio::test]
    async fn observer_sees_labels_deltas_and_completions() {
        #[derive(Default)]
        struct Recording {
            starts: Vec<(Option<String>, Option<String>)>,
            deltas: String,
            completed: usize,
        }

        impl TurnObserver for Recording {
            fn on_message_start(&mut self, channel: Option<&str>, recipient: Option<&str>) {
                self.starts
                    .push((channel.map(String::from), recipient.map(String::from)));
            }
            fn on_content_delta(&mut self, delta: &str) {
                self.deltas.push_str(delta);
            }
            fn on_message_complete(&mut self, _message: &Message) {
                self.completed += 1;
            }
        }

        let mut session = session(
            &["<|channel|>analysis<|message|>thinking.<|end|>\
               <|start|>assistant<|channel|>final<|message|>done<|return|>"],
            ToolRouter::new(),
        );
        let mut observer = Recording::default();
        session
            .process_user_message("go", &mut observer)
            .await
            .unwrap();

        assert_eq!(observer.starts.len(), 2);
        assert_eq!(observer.starts[0].0.as_deref(), Some("analysis"));
        assert_eq!(observer.starts[1].0.as_deref(), Some("final"));
        assert_eq!(observer.deltas, "thinking.done");
        assert_eq!(observer.completed, 2);
    }

    #[tokio::test]
    async fn encoding_mismatch_refused_at_construction() {
        let err = Session::new(
            Box::new(MismatchedSource),
            ToolRouter::new(),
            system(),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("gpt2-bpe"));
    }
}
