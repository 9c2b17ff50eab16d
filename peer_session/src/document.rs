use std::{collections::BTreeMap, rc::Rc};

use tokio::sync::watch;

use crate::template;

/// The shared editable state: a story template and the values of its fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Document {
    template: String,
    inputs: BTreeMap<String, String>,
}

impl Document {
    /// Takes both parts verbatim, as received in a state snapshot.
    pub fn new(template: impl Into<String>, inputs: BTreeMap<String, String>) -> Self {
        Self {
            template: template.into(),
            inputs,
        }
    }

    pub fn from_template(template: impl Into<String>) -> Self {
        let mut document = Self::default();
        document.set_template(template);
        document
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn inputs(&self) -> &BTreeMap<String, String> {
        &self.inputs
    }

    /// Replaces the template and re-derives the inputs from its fields.
    pub fn set_template(&mut self, template: impl Into<String>) {
        self.template = template.into();
        self.inputs = template::rederive_inputs(&self.template, &self.inputs);
    }

    pub fn set_input(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inputs.insert(name.into(), value.into());
    }

    pub fn fields(&self) -> Vec<String> {
        template::fields(&self.template)
    }

    /// Fields still without a non-blank value.
    pub fn missing_fields(&self) -> Vec<String> {
        self.fields()
            .into_iter()
            .filter(|field| {
                self.inputs
                    .get(field)
                    .map_or(true, |value| value.trim().is_empty())
            })
            .collect()
    }

    /// Whether the template has fields and every one of them is filled in.
    pub fn is_complete(&self) -> bool {
        !self.fields().is_empty() && self.missing_fields().is_empty()
    }

    pub fn story(&self) -> String {
        template::substitute(&self.template, &self.inputs)
    }
}

/// Handle to the document owned by the host application.
///
/// Every change, local or remote, is published to [`subscribe`]rs, which is
/// how the host learns about updates applied by the collaboration protocol.
///
/// [`subscribe`]: SharedDocument::subscribe
#[derive(Debug, Clone)]
pub struct SharedDocument {
    tx: Rc<watch::Sender<Document>>,
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new(Document::default())
    }
}

impl SharedDocument {
    pub fn new(document: Document) -> Self {
        let (tx, _) = watch::channel(document);
        Self { tx: Rc::new(tx) }
    }

    pub fn snapshot(&self) -> Document {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Document> {
        self.tx.subscribe()
    }

    pub fn replace(&self, document: Document) {
        self.tx.send_replace(document);
    }

    pub fn set_template(&self, template: impl Into<String>) {
        let template = template.into();
        self.tx.send_modify(|document| document.set_template(template));
    }

    pub fn set_input(&self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        self.tx.send_modify(|document| document.set_input(name, value));
    }
}
