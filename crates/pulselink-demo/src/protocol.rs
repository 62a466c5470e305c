use pulselink::Message;
use serde::{Deserialize, Serialize};
use strum::EnumDiscriminants;

/// Messages exchanged by the demo client and server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(derive(Hash), name(TestKind))]
pub enum TestMessage {
    /// Client to server: text to be reversed.
    TestRequest(String),
    /// Server to client: the reversed text.
    TestResponse(String),
}

impl Message for TestMessage {
    type Kind = TestKind;

    fn kind(&self) -> TestKind {
        self.into()
    }
}

pub fn reverse(text: &str) -> String {
    text.chars().rev().collect()
}
