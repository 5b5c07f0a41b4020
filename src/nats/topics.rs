/// Bus topics shared with the other robot services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    WakeDetected,
    SttCapture,
    SttText,
    TtsSay,
}

impl Topic {
    /// Topic name relative to the base prefix
    pub fn suffix(&self) -> &'static str {
        match self {
            Topic::WakeDetected => "wake/detected",
            Topic::SttCapture => "stt/capture",
            Topic::SttText => "stt/text",
            Topic::TtsSay => "tts/say",
        }
    }

    /// NATS subject: `base.suffix` with `/` as `.`
    pub fn subject(&self, base: &str) -> String {
        let base = base.trim_matches(|c| c == '.' || c == '/').replace('/', ".");
        let suffix = self.suffix().replace('/', ".");
        if base.is_empty() {
            suffix
        } else {
            format!("{}.{}", base, suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        assert_eq!(Topic::WakeDetected.subject("robot"), "robot.wake.detected");
        assert_eq!(Topic::SttCapture.subject("robot/"), "robot.stt.capture");
        assert_eq!(Topic::SttText.subject("home/robot"), "home.robot.stt.text");
        assert_eq!(Topic::TtsSay.subject(""), "tts.say");
    }
}
