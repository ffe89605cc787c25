use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Human,
    /// One JSON object per line on stdout, errors on stderr.
    Json,
}

/// Prints command results for people or for scripts, depending on `--json`.
pub struct Output {
    mode: Mode,
}

impl Output {
    pub fn new(json: bool) -> Self {
        let mode = if json { Mode::Json } else { Mode::Human };
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn success<T: Serialize>(&self, command: &str, data: T) {
        match self.mode {
            Mode::Json => println!("{}", render(&Envelope::ok(command, data))),
            Mode::Human => println!("{}", render_pretty(&data)),
        }
    }

    pub fn success_message(&self, command: &str, message: &str) {
        match self.mode {
            Mode::Json => {
                let data = serde_json::json!({ "message": message });
                println!("{}", render(&Envelope::ok(command, data)));
            }
            Mode::Human => println!("{}", message),
        }
    }

    pub fn error(&self, message: &str) {
        match self.mode {
            Mode::Json => eprintln!("{}", render(&Envelope::<()>::failed(message))),
            Mode::Human => eprintln!("Error: {}", message),
        }
    }

    /// One step of the demo transcript. JSON mode flattens `data` next to `event`.
    pub fn event<T: Serialize>(&self, event_type: &str, data: T) {
        match self.mode {
            Mode::Json => println!(
                "{}",
                render(&Event {
                    event: event_type,
                    data,
                })
            ),
            Mode::Human => println!("[{}] {}", event_type, render(&data)),
        }
    }

    /// Narration for people; skipped in JSON mode.
    pub fn note(&self, text: &str) {
        if self.mode == Mode::Human {
            println!("{}", text);
        }
    }
}

fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

fn render_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {}>", e))
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Ok,
    Error,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    status: Status,
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    fn ok(command: &'a str, data: T) -> Self {
        Self {
            status: Status::Ok,
            command,
            data: Some(data),
            error: None,
        }
    }

    fn failed(message: &'a str) -> Self {
        Self {
            status: Status::Error,
            command: "",
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
struct Event<'a, T: Serialize> {
    event: &'a str,
    #[serde(flatten)]
    data: T,
}
