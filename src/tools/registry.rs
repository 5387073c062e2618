//! 工具注册表
//!
//! 每个工具是一条数据描述的 ToolDefinition：名称、描述、映射的后端能力、输入字段约束。
//! 注册时校验定义本身（字段不重名、枚举非空、范围合法），调用时集中校验输入，
//! 不再在各分支里零散地做类型转换。

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};

use crate::backends::Capability;
use crate::core::AgentError;

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Boolean,
}

impl FieldType {
    fn json_type(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
        }
    }
}

/// 单个输入字段的约束
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub description: String,
    pub required: bool,
    /// 字符串枚举
    pub allowed: Option<Vec<String>>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl FieldSpec {
    fn new(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            description: description.to_string(),
            required: false,
            allowed: None,
            min: None,
            max: None,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::String, description)
    }

    pub fn integer(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::Integer, description)
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::Boolean, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// 定义自身是否合法
    fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("field with empty name".to_string());
        }
        if let Some(allowed) = &self.allowed {
            if allowed.is_empty() {
                return Err(format!("field '{}' has an empty enum", self.name));
            }
            if self.field_type != FieldType::String {
                return Err(format!("field '{}' declares an enum on a non-string type", self.name));
            }
        }
        if (self.min.is_some() || self.max.is_some()) && self.field_type != FieldType::Integer {
            return Err(format!("field '{}' declares a range on a non-integer type", self.name));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(format!("field '{}' has min {min} > max {max}", self.name));
            }
        }
        Ok(())
    }

    /// 校验一个具体取值
    fn check_value(&self, value: &Value) -> Result<(), String> {
        match self.field_type {
            FieldType::String => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("'{}' must be a string", self.name))?;
                if self.required && s.trim().is_empty() {
                    return Err(format!("'{}' must not be empty", self.name));
                }
                if let Some(allowed) = &self.allowed {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(format!(
                            "'{}' must be one of [{}], got '{s}'",
                            self.name,
                            allowed.join(", ")
                        ));
                    }
                }
            }
            FieldType::Integer => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| format!("'{}' must be an integer", self.name))?;
                if let Some(min) = self.min {
                    if n < min {
                        return Err(format!("'{}' must be >= {min}, got {n}", self.name));
                    }
                }
                if let Some(max) = self.max {
                    if n > max {
                        return Err(format!("'{}' must be <= {max}, got {n}", self.name));
                    }
                }
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    return Err(format!("'{}' must be a boolean", self.name));
                }
            }
        }
        Ok(())
    }

    fn schema(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".to_string(), json!(self.field_type.json_type()));
        prop.insert("description".to_string(), json!(self.description));
        if let Some(allowed) = &self.allowed {
            prop.insert("enum".to_string(), json!(allowed));
        }
        if let Some(min) = self.min {
            prop.insert("minimum".to_string(), json!(min));
        }
        if let Some(max) = self.max {
            prop.insert("maximum".to_string(), json!(max));
        }
        Value::Object(prop)
    }
}

/// 工具定义：进程启动时创建，之后只读
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    /// 工具描述（供模型理解功能）
    pub description: String,
    pub capability: Capability,
    pub fields: Vec<FieldSpec>,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, capability: Capability) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            capability,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// 注册期校验：名称非空、字段不重名、每个字段约束合法
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.name.trim().is_empty() {
            return Err(AgentError::invalid_tool("<unnamed>", "tool name is empty"));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            field
                .check()
                .map_err(|reason| AgentError::invalid_tool(&self.name, reason))?;
            if !seen.insert(field.name.as_str()) {
                return Err(AgentError::invalid_tool(
                    &self.name,
                    format!("duplicate field '{}'", field.name),
                ));
            }
        }
        Ok(())
    }

    /// 调用期校验：输入必须是对象，必填字段存在，类型 / 枚举 / 范围符合约束，不接受未声明字段
    pub fn validate_input(&self, input: &Value) -> Result<(), String> {
        let obj = input
            .as_object()
            .ok_or_else(|| "input must be a JSON object".to_string())?;
        for key in obj.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                return Err(format!("unexpected field '{key}'"));
            }
        }
        for field in &self.fields {
            match obj.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required field '{}'", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) => field.check_value(value)?,
            }
        }
        Ok(())
    }

    /// 参数 JSON Schema（供模型生成正确的参数格式）
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// 工具注册表：按名称存储 ToolDefinition
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个工具；定义不合法或重名时返回启动期错误
    pub fn register(&mut self, def: ToolDefinition) -> Result<(), AgentError> {
        def.validate()?;
        if self.tools.contains_key(&def.name) {
            return Err(AgentError::invalid_tool(&def.name, "registered twice"));
        }
        self.tools.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按名称排序的全部定义（下发给模型的顺序稳定）
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// 只保留 allowed 中列出的工具；allowed 为空表示不限制
    pub fn restricted(&self, allowed: &[String]) -> ToolRegistry {
        if allowed.is_empty() {
            return self.clone();
        }
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| allowed.iter().any(|a| a == *name))
            .map(|(name, def)| (name.clone(), def.clone()))
            .collect();
        ToolRegistry { tools }
    }

    /// 被引用到的后端能力
    pub fn capabilities(&self) -> HashSet<Capability> {
        self.tools.values().map(|d| d.capability).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 返回 (name, description) 列表，用于 system prompt 中的工具说明
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.definitions()
            .into_iter()
            .map(|d| (d.name, d.description))
            .collect()
    }
}
