use std::sync::Arc;

use serde_json::json;

use super::decode_result;
use crate::error::Result;
use crate::protocol::{
    CompleteResult, CompletionArgument, CompletionReference, CompletionResult, methods,
};
use crate::session::Session;

/// `completion/complete` façade.
pub struct Completion {
    session: Arc<Session>,
}

impl Completion {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Suggest values for a prompt argument or a resource template variable.
    pub fn complete(
        &self,
        reference: &CompletionReference,
        argument: &CompletionArgument,
    ) -> Result<CompletionResult> {
        let params = json!({ "ref": reference, "argument": argument });
        let value = self
            .session
            .send_request(methods::COMPLETION_COMPLETE, Some(params))?;
        let result: CompleteResult = decode_result(methods::COMPLETION_COMPLETE, value)?;
        Ok(result.completion)
    }
}
