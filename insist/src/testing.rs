// Shared fixtures for unit tests

use crate::codec::{CodecRegistry, FieldCodec, TextCodec};
use crate::error::Result;
use crate::record::{unknown_attribute, Record};
use crate::schema::{FieldType, Schema, TypeKind, Value};
use crate::watcher::WatchControl;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub firstname: String,
    pub lastname: String,
    pub salary: Option<i64>,
    pub motto: Option<String>,
}

impl Person {
    pub fn new(firstname: &str, lastname: &str) -> Self {
        Person {
            firstname: firstname.into(),
            lastname: lastname.into(),
            salary: None,
            motto: None,
        }
    }
}

impl Default for Person {
    fn default() -> Self {
        Person::new("", "")
    }
}

impl Record for Person {
    fn get(&self, attribute: &str) -> Option<Value> {
        match attribute {
            "firstname" => Some(self.firstname.clone().into()),
            "lastname" => Some(self.lastname.clone().into()),
            "salary" => Some(self.salary.into()),
            "motto" => Some(self.motto.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, attribute: &str, value: Value) -> Result<()> {
        match attribute {
            "firstname" => self.firstname = value.extract()?,
            "lastname" => self.lastname = value.extract()?,
            "salary" => self.salary = value.extract()?,
            "motto" => self.motto = value.extract()?,
            _ => return Err(unknown_attribute::<Self>(attribute)),
        }
        Ok(())
    }
}

/// Crew member without a salary; shares the person schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Robot {
    pub firstname: String,
    pub lastname: String,
}

impl Record for Robot {
    fn get(&self, attribute: &str) -> Option<Value> {
        match attribute {
            "firstname" => Some(self.firstname.clone().into()),
            "lastname" => Some(self.lastname.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, attribute: &str, value: Value) -> Result<()> {
        match attribute {
            "firstname" => self.firstname = value.extract()?,
            "lastname" => self.lastname = value.extract()?,
            _ => return Err(unknown_attribute::<Self>(attribute)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Company {
    pub name: String,
    pub founded: Option<chrono::NaiveDate>,
    pub tags: Vec<String>,
}

impl Record for Company {
    fn get(&self, attribute: &str) -> Option<Value> {
        match attribute {
            "name" => Some(self.name.clone().into()),
            "founded" => Some(self.founded.into()),
            "tags" => Some(self.tags.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, attribute: &str, value: Value) -> Result<()> {
        match attribute {
            "name" => self.name = value.extract()?,
            "founded" => self.founded = value.extract()?,
            "tags" => self.tags = value.extract()?,
            _ => return Err(unknown_attribute::<Self>(attribute)),
        }
        Ok(())
    }
}

pub fn person_schema() -> Schema {
    Schema::new("person")
        .field("firstname", FieldType::TextLine)
        .field("lastname", FieldType::TextLine)
        .field("salary", FieldType::Int)
        .field("motto", FieldType::Text)
}

pub fn company_schema() -> Schema {
    Schema::new("company")
        .field("name", FieldType::TextLine)
        .field("founded", FieldType::Date)
        .field("tags", FieldType::list(FieldType::TextLine))
}

/// Single-line text codec counting its decode calls.
pub struct CountingCodec {
    inner: TextCodec,
    pub decodes: Arc<AtomicUsize>,
}

impl FieldCodec for CountingCodec {
    fn encode(&self, value: &Value) -> std::result::Result<Option<String>, String> {
        self.inner.encode(value)
    }

    fn decode(&self, raw: &str) -> std::result::Result<Value, String> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.inner.decode(raw)
    }
}

/// Codec registry whose text-line codec counts decodes into the returned
/// counter.
pub fn counting_codecs() -> (CodecRegistry, Arc<AtomicUsize>) {
    let decodes = Arc::new(AtomicUsize::new(0));
    let mut registry = CodecRegistry::new();
    registry.register_codec(
        TypeKind::TextLine,
        Arc::new(CountingCodec {
            inner: TextCodec::line(),
            decodes: decodes.clone(),
        }),
    );
    (registry, decodes)
}

/// Records watch requests instead of talking to the OS.
#[derive(Debug, Default)]
pub struct RecordingControl {
    pub watched: Vec<PathBuf>,
    pub unwatched: Vec<PathBuf>,
}

impl WatchControl for RecordingControl {
    fn watch(&mut self, dir: &Path) -> Result<()> {
        self.watched.push(dir.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, dir: &Path) -> Result<()> {
        self.unwatched.push(dir.to_path_buf());
        Ok(())
    }
}

/// Canonical form of a temp path; temp dirs may sit behind symlinks.
pub fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap()
}
