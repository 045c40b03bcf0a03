use log::error;

pub trait Reporter: Send + Sync {
    fn report(&self, subject: &str, body: &str);
}

pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, subject: &str, body: &str) {
        error!("Error report: {}\n{}", subject, body);
    }
}
