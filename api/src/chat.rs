use crate::app::{bad_request, AppState};
use crate::query_payload::ChatPayload;
use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, StreamExt};
use std::convert::Infallible;

pub const CHAT_ERROR_MESSAGE: &str = "Oops! An error occurred. Please try again";

fn error_event() -> Event {
    Event::default().event("error").data(CHAT_ERROR_MESSAGE)
}

/// Relays the model's reply as server-sent events: one `data` event per
/// delta, then `done`, or a single `error` event if the upstream call fails.
pub async fn chat(State(state): State<AppState>, Json(payload): Json<ChatPayload>) -> Response {
    let message = payload.message.trim();
    if message.is_empty() {
        return bad_request("message must not be empty");
    }

    let events = match state.library.openai.stream_chat(message).await {
        Ok(deltas) => deltas
            .map(|delta| match delta {
                // SSE cannot carry carriage returns
                Ok(text) => Event::default().data(text.replace('\r', "")),
                Err(e) => {
                    log::error!("Chat stream failed: {:#}", e);
                    error_event()
                }
            })
            .chain(stream::once(async { Event::default().event("done").data("") }))
            .map(Ok::<_, Infallible>)
            .boxed(),
        Err(e) => {
            log::error!("Error starting chat completion: {:#}", e);
            stream::once(async { Ok::<_, Infallible>(error_event()) }).boxed()
        }
    };

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
