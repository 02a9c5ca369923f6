use crate::export::CleanedMessage;

/// Renders one transcript message the way the model sees example material.
fn render_example(message: &CleanedMessage) -> String {
    format!("{} ({}): {}", message.from, message.date, message.text)
}

pub fn render_examples(transcript: &[CleanedMessage]) -> String {
    transcript
        .iter()
        .map(render_example)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the persona-conditioning instruction for the completion call.
/// Deterministic: the output depends only on the interlocutor name and the
/// transcript contents.
pub fn build_style_prompt(interlocutor: &str, transcript: &[CleanedMessage]) -> String {
    format!(
        "You are imitating the texting style of a person named {interlocutor}.\n\
         Here are examples of their messages:\n\n\
         {}\n\n\
         Answer the way this person would answer, keeping their style, their manner \
         of speech, and their conversational quirks. Never mention that you are an AI. \
         Keep the reply length natural for a chat. \
         Reply ONLY with the message text, without names, dates, or any other metadata.",
        render_examples(transcript)
    )
}
