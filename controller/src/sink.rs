/*!
Operator-facing text output.

Components that need to show text to the operator receive a [`LogSink`] when
they are constructed. The console implements it for the interactive binary;
tests use [`testing::MemorySink`].
*/

/// Receiver of operator-facing text
pub trait LogSink: Send + Sync {
    /// Text received on the pointing system's feedback stream
    fn feedback(&self, text: &str);

    /// A diagnostic for the operator (errors, state changes)
    fn report(&self, message: &str);
}

#[cfg(test)]
pub mod testing {
    use super::LogSink;
    use std::sync::Mutex;

    /// Sink collecting everything in memory
    #[derive(Default)]
    pub struct MemorySink {
        pub feedback: Mutex<String>,
        pub reports: Mutex<Vec<String>>,
    }

    impl MemorySink {
        pub fn feedback_text(&self) -> String {
            self.feedback.lock().unwrap().clone()
        }

        pub fn reports(&self) -> Vec<String> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl LogSink for MemorySink {
        fn feedback(&self, text: &str) {
            self.feedback.lock().unwrap().push_str(text);
        }

        fn report(&self, message: &str) {
            self.reports.lock().unwrap().push(message.to_string());
        }
    }
}
