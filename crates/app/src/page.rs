use talkdocs_core::{Speaker, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

const CSS: &str = r#"
body { margin: 0; font-family: system-ui, sans-serif; background: #0e1117; color: #fafafa; display: flex; min-height: 100vh; }
aside { width: 300px; background: #262730; padding: 1.5rem; box-sizing: border-box; }
main { flex: 1; padding: 2rem 3rem; max-width: 860px; }
h1 { margin-top: 0; }
input[type=text] { width: 100%; padding: .6rem; border-radius: .4rem; border: 1px solid #555; background: #1b1d24; color: inherit; box-sizing: border-box; }
button { margin-top: .8rem; padding: .5rem 1.2rem; border-radius: .4rem; border: 1px solid #888; background: #1b1d24; color: inherit; cursor: pointer; }
.notice { padding: .8rem 1rem; border-radius: .4rem; margin-bottom: .8rem; }
.notice.success { background: #173928; color: #7ee2a8; }
.notice.warning { background: #3d3418; color: #ffd16a; }
.notice.error { background: #3e1e21; color: #ff8b8b; }
.chat-message { padding: 1.2rem; border-radius: .5rem; margin-bottom: 1rem; display: flex; }
.chat-message.user { background-color: #2b313e; }
.chat-message.bot { background-color: #475063; }
.chat-message .avatar { width: 15%; }
.chat-message .avatar span { display: inline-flex; align-items: center; justify-content: center; width: 56px; height: 56px; border-radius: 50%; background: #8a94a6; font-weight: bold; }
.chat-message .message { width: 85%; padding: 0 1.2rem; white-space: pre-wrap; }
.dot { animation: blink 1.4s infinite both; }
.dot:nth-child(2) { animation-delay: .2s; }
.dot:nth-child(3) { animation-delay: .4s; }
@keyframes blink { 0% { opacity: .2; } 20% { opacity: 1; } 100% { opacity: .2; } }
"#;

const SCRIPT: &str = r#"
document.getElementById('ask').addEventListener('submit', function () {
  var typing = document.getElementById('typing');
  if (typing) { typing.hidden = false; }
});
document.getElementById('process').addEventListener('submit', function () {
  var status = document.getElementById('processing');
  if (status) { status.hidden = false; }
});
"#;

pub fn render(transcript: &[Turn], notices: &[Notice], ready: bool) -> String {
    let notices_html: String = notices.iter().map(render_notice).collect();
    let transcript_html: String = transcript.iter().map(render_turn).collect();
    let placeholder = if ready {
        "Ask a question about your documents:"
    } else {
        "Upload and process your PDFs, then ask a question:"
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>TalkDocs</title>
<style>{CSS}</style>
</head>
<body>
<aside>
  <h3>Your documents</h3>
  <form id="process" action="/process" method="post" enctype="multipart/form-data">
    <label for="pdfs">Upload your PDFs here and click on 'Process'</label>
    <input id="pdfs" type="file" name="pdfs" accept=".pdf,application/pdf" multiple>
    <button type="submit">Process</button>
    <p id="processing" hidden>Processing...</p>
  </form>
</aside>
<main>
  <h1>TalkDocs &#128218;</h1>
  <h3>Chat with multiple PDFs</h3>
  {notices_html}
  <form id="ask" action="/ask" method="post">
    <label for="question">{placeholder}</label>
    <input id="question" type="text" name="question" autocomplete="off" autofocus>
  </form>
  <div id="transcript">
  {transcript_html}
  <div id="typing" class="chat-message bot" hidden>
    <div class="avatar"><span>AI</span></div>
    <div class="message">Typing<span class="dot">.</span><span class="dot">.</span><span class="dot">.</span></div>
  </div>
  </div>
</main>
<script>{SCRIPT}</script>
</body>
</html>"#
    )
}

fn render_notice(notice: &Notice) -> String {
    let (class, icon) = match notice.level {
        NoticeLevel::Success => ("success", "&#9989;"),
        NoticeLevel::Warning => ("warning", "&#9888;&#65039;"),
        NoticeLevel::Error => ("error", "&#10060;"),
    };
    format!(
        "<div class=\"notice {class}\">{icon} {}</div>\n",
        escape_html(&notice.text)
    )
}

fn render_turn(turn: &Turn) -> String {
    let (class, avatar) = match turn.speaker {
        Speaker::User => ("user", "You"),
        Speaker::Bot => ("bot", "AI"),
    };
    format!(
        "<div class=\"chat-message {class}\">\n  <div class=\"avatar\"><span>{avatar}</span></div>\n  <div class=\"message\">{}</div>\n</div>\n",
        escape_html(&turn.message)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
