#![allow(dead_code)]

use async_trait::async_trait;
use churnguard::llm::{GenerationOptions, LanguageModel};
use churnguard::Result;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const TRANSLATOR_MARKER: &str = "You translate questions about a single SQLite table";
pub const EXPRESSION_MARKER: &str = "You answer questions about a pandas DataFrame";
pub const PREDICTIVE_MARKER: &str = "no explicit churn label";

type Handler = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Language model double: a closure picks the reply for each prompt and
/// every prompt is recorded.
pub struct ScriptedModel {
    handler: Handler,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(handler: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn count_containing(&self, marker: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(marker)).count()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.handler)(prompt)
    }
}

pub const CUSTOMERS_CSV: &str = "Name ,City,Email,Phone,Age
Riya Sharma,Mumbai,riya@example.com,+91 98765 43210,31
Amit Verma,Delhi,,9876501234,45
Sara Khan,Mumbai,sara@example.com,00447700900123,28
John Doe,Pune,john@example,12345,
Meera Iyer,Delhi,meera@example.com,919812345678,39
";

pub const CHURN_CSV: &str = "Name,Phone,engagement_score,MonthlyCharges,complaints
Riya Sharma,919876543210,10,99.5,0
Amit Verma,919876501234,80,45.0,0
Sara Khan,447700900123,90,70.0,3
Meera Iyer,919812345678,20,120.0,1
";

pub fn write_csv(dir: &Path, file_name: &str, content: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, content).unwrap();
    path
}
