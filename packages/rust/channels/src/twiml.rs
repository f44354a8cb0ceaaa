//! TwiML responses for the rep call-bridge webhooks.

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Played to the rep when they pick up: press 1 to be connected.
pub fn rep_answer_prompt(gather_action: &str) -> String {
    format!(
        "{XML_HEADER}<Response>\
         <Gather numDigits=\"1\" action=\"{}\" method=\"POST\">\
         <Say>You have a new lead from LeadForge. Press 1 to connect.</Say>\
         </Gather>\
         <Say>No input received. Goodbye.</Say>\
         </Response>",
        escape_xml(gather_action)
    )
}

/// Bridge the rep to the lead's number.
pub fn connect(phone: &str) -> String {
    format!(
        "{XML_HEADER}<Response><Say>Connecting you now.</Say><Dial>{}</Dial></Response>",
        escape_xml(phone)
    )
}

/// Say a message and end the call.
pub fn say_and_hangup(message: &str) -> String {
    format!(
        "{XML_HEADER}<Response><Say>{}</Say><Hangup/></Response>",
        escape_xml(message)
    )
}

/// Acknowledge a callback without instructions.
pub fn empty() -> String {
    format!("{XML_HEADER}<Response/>")
}
