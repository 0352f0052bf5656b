//! Prompt template generation: renders a descriptor tree into the
//! bracketed-metadata schema format a model is instructed to fill in.
//!
//! Output is deterministic for a given tree (field order = declaration
//! order), so templates can be snapshot-tested byte for byte.

use crate::schema::{Descriptor, DescriptorKind, ScalarType};

/// Render the schema description for `desc`. With `include_instructions`
/// the schema is wrapped in `<response_instructions>` together with the
/// fixed format preamble and worked example.
pub fn render_template(desc: &Descriptor, include_instructions: bool) -> String {
    let eff = desc.effective();
    let schema = match &eff.kind {
        DescriptorKind::Object(obj) => obj
            .fields
            .iter()
            .map(|f| render_field(&f.descriptor))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => render_field(eff),
    };
    if include_instructions {
        format!(
            "<response_instructions>\n{}\n</response_instructions>",
            adhere_instructions(&schema)
        )
    } else {
        schema
    }
}

fn render_field(desc: &Descriptor) -> String {
    let eff = desc.effective();
    let description = if eff.description.is_empty() {
        format!("Description of {}", eff.name)
    } else {
        eff.description.clone()
    };
    let ti = type_info(eff);
    match &eff.kind {
        DescriptorKind::Scalar(_) => {
            format!("<{0}>\n[{1}]\n[{2}]\n</{0}>", eff.name, ti, description)
        }
        DescriptorKind::Object(schema) => {
            let nested = schema
                .fields
                .iter()
                .map(|f| render_field(&f.descriptor))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "<{0}>\n[{1}]\n[{2}]\n{3}\n</{0}>",
                eff.name, ti, description, nested
            )
        }
        DescriptorKind::List(elem) => {
            let e = elem.effective();
            match &e.kind {
                DescriptorKind::Union(alts) => render_options(eff, &ti, &description, alts),
                DescriptorKind::Object(schema) => {
                    let nested = schema
                        .fields
                        .iter()
                        .map(|f| render_field(&f.descriptor))
                        .collect::<Vec<_>>()
                        .join("\n");
                    // one item template inside the list wrapper
                    format!(
                        "<{0}>\n[{1}]\n[{2}]\n<{3}>\n{4}\n</{3}>\n</{0}>",
                        eff.name, ti, description, e.name, nested
                    )
                }
                _ => format!(
                    "<{0}>\n[{1}]\n[{2}]\n{3}\n</{0}>",
                    eff.name,
                    ti,
                    description,
                    render_field(e)
                ),
            }
        }
        DescriptorKind::Union(alts) => render_options(eff, &ti, &description, alts),
        DescriptorKind::Optional(_) => unreachable!("effective() strips Optional"),
    }
}

/// `# Option N:` blocks for union alternatives, joined by `OR`.
fn render_options(
    field: &Descriptor,
    ti: &str,
    description: &str,
    alts: &[Descriptor],
) -> String {
    let blocks: Vec<String> = alts
        .iter()
        .enumerate()
        .map(|(i, alt)| {
            let a = alt.effective();
            let body = match &a.kind {
                DescriptorKind::Object(schema) => schema
                    .fields
                    .iter()
                    .map(|f| render_field(&f.descriptor))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => render_field(a),
            };
            format!(
                "\n# Option {}: {}\n<{}>\n{}\n</{}>\n",
                i + 1,
                display_type_name(a),
                a.name,
                body,
                a.name
            )
        })
        .collect();
    format!(
        "<{0}>\n[{1}]\n[{2}]{3}\n</{0}>",
        field.name,
        ti,
        description,
        blocks.join("\nOR\n")
    )
}

fn type_info(eff: &Descriptor) -> String {
    match &eff.kind {
        DescriptorKind::Scalar(ScalarType::String) => "type: str".to_string(),
        DescriptorKind::Scalar(ScalarType::Int) => "type: int".to_string(),
        DescriptorKind::Scalar(ScalarType::Float) => "type: float".to_string(),
        DescriptorKind::Scalar(ScalarType::Bool) => "type: bool".to_string(),
        DescriptorKind::Scalar(ScalarType::Enum(variants)) => {
            format!("type: Literal[{}]", variants.join(", "))
        }
        DescriptorKind::Object(obj) => format!("type: {}", obj.type_name),
        DescriptorKind::List(elem) => match &elem.effective().kind {
            DescriptorKind::Union(alts) => {
                format!("type: list of {}", quoted_type_names(alts))
            }
            _ => "type: list".to_string(),
        },
        DescriptorKind::Union(alts) => format!("type: one of {}", quoted_type_names(alts)),
        DescriptorKind::Optional(inner) => type_info(inner.effective()),
    }
}

fn quoted_type_names(alts: &[Descriptor]) -> String {
    alts.iter()
        .map(|a| format!("'{}'", display_type_name(a.effective())))
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_type_name(d: &Descriptor) -> &str {
    match &d.kind {
        DescriptorKind::Object(o) => &o.type_name,
        _ => &d.name,
    }
}

fn adhere_instructions(schema: &str) -> String {
    format!(
        "{}\n\nRequested Response Schema:\n{}\n\nMake sure to return an instance of the output, NOT the schema itself. Do NOT include any schema metadata (like [type: ...]) in your output.",
        FORMAT_PREAMBLE, schema
    )
}

const FORMAT_PREAMBLE: &str = r#"You are to provide your output in the following xml-like format EXACTLY as described in the schema provided.

Each field in the schema has a description and a type enclosed in square brackets, denoting that they are metadata.

Format instructions:
<field_name>
[object_type]
[description]
</field_name>


Basic example:

<EXAMPLE>
<EXAMPLE_SCHEMA>
<thinking>
[type: str]
[Chain of thought]
</thinking>
<actions>
# Option 1: CommandAction
<command_action>
<action_type>
[type: Literal["command"]]
[The type of action to perform]
</action_type>
<command>
[type: str]
[The command to run]
</command>
</command_action>

OR

<action>
# Option 2: CreateAction
<create_action>
<action_type>
[type: Literal["create"]]
[The type of action to perform]
</action_type>
<new_file_path>
[type: str]
[The path to the new file to create]
</new_file_path>
<file_contents>
[type: str]
[The contents of the new file to create]
</file_contents>
</create_action>

OR

# Option 3: EditAction
<edit_action>
<action_type>
[type: Literal["edit"]]
[The type of action to perform]
</action_type>
<original_file_path>
[type: str]
[The path to the original file to edit]
</original_file_path>
<new_file_contents>
[type: str]
[The contents of the edited file]
</new_file_contents>
</edit_action>

</actions>
</EXAMPLE_SCHEMA>

<EXAMPLE_OUTPUT>
<thinking>
First, I need to create a new configuration file. Then, I'll modify an existing source file to use the new configuration.
</thinking>
<actions>
<create_action>
<action_type>create</action_type>
<new_file_path>config/settings.json</new_file_path>
<file_contents>interface Config {
  apiKey: string;
  baseUrl: string;
  timeout: number;
}

const config: Config = {
  apiKey: "your-api-key-here",
  baseUrl: "https://api.example.com",
  timeout: 30
};</file_contents>
</create_action>

<edit_action>
<action_type>edit</action_type>
<original_file_path>src/main.py</original_file_path>
<new_file_contents>import json

def load_config():
    with open('config/settings.json', 'r') as f:
        return json.load(f)

def main():
    config = load_config()
    print(f"Connecting to {config['base_url']}...")

if __name__ == '__main__':
    main()</new_file_contents>
</edit_action>
</actions>
</EXAMPLE_OUTPUT>
</EXAMPLE>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, ScalarType};

    fn create_action() -> Descriptor {
        Descriptor::object(
            "create_action",
            "CreateAction",
            "",
            vec![
                FieldDef::required(Descriptor::scalar(
                    "action_type",
                    ScalarType::Enum(vec!["create".to_string()]),
                    "The type of action to perform",
                )),
                FieldDef::required(Descriptor::scalar(
                    "new_file_path",
                    ScalarType::String,
                    "The path to the new file to create",
                )),
                FieldDef::required(Descriptor::scalar(
                    "file_contents",
                    ScalarType::String,
                    "The contents of the new file to create",
                )),
            ],
        )
    }

    fn edit_action() -> Descriptor {
        Descriptor::object(
            "edit_action",
            "EditAction",
            "",
            vec![
                FieldDef::required(Descriptor::scalar(
                    "action_type",
                    ScalarType::Enum(vec!["edit".to_string()]),
                    "The type of action to perform",
                )),
                FieldDef::required(Descriptor::scalar(
                    "original_file_path",
                    ScalarType::String,
                    "The path to the original file to edit",
                )),
            ],
        )
    }

    fn action_root() -> Descriptor {
        Descriptor::object(
            "root",
            "Action",
            "",
            vec![
                FieldDef::required(Descriptor::scalar(
                    "thinking",
                    ScalarType::String,
                    "The thinking to perform",
                )),
                FieldDef::required(Descriptor::list(
                    "actions",
                    "The actions to perform",
                    Descriptor::union("action", "", vec![create_action(), edit_action()]),
                )),
            ],
        )
    }

    #[test]
    fn test_simple_model_template() {
        let expected = "<action_type>\n[type: Literal[create]]\n[The type of action to perform]\n</action_type>\n\
                        <new_file_path>\n[type: str]\n[The path to the new file to create]\n</new_file_path>\n\
                        <file_contents>\n[type: str]\n[The contents of the new file to create]\n</file_contents>";
        assert_eq!(render_template(&create_action(), false), expected);
    }

    #[test]
    fn test_union_list_template() {
        let result = render_template(&action_root(), true);
        assert!(result.starts_with("<response_instructions>"));
        assert!(result.ends_with("</response_instructions>"));
        assert!(result.contains("<thinking>\n[type: str]\n[The thinking to perform]\n</thinking>"));
        assert!(result.contains("[type: list of 'CreateAction', 'EditAction']"));
        assert!(result.contains("# Option 1: CreateAction"));
        assert!(result.contains("# Option 2: EditAction"));
        assert!(result.contains("\nOR\n"));
        assert!(result.contains("<original_file_path>"));
    }

    #[test]
    fn test_nested_list_of_objects() {
        let movie = Descriptor::object(
            "movie",
            "Movie",
            "",
            vec![
                FieldDef::required(Descriptor::scalar(
                    "title",
                    ScalarType::String,
                    "The title of the movie",
                )),
                FieldDef::required(Descriptor::scalar(
                    "director",
                    ScalarType::String,
                    "The director of the movie",
                )),
            ],
        );
        let root = Descriptor::object(
            "root",
            "Response",
            "",
            vec![FieldDef::required(Descriptor::list(
                "movies",
                "A list of movies that match the query",
                movie,
            ))],
        );
        let expected = "<movies>\n[type: list]\n[A list of movies that match the query]\n\
                        <movie>\n\
                        <title>\n[type: str]\n[The title of the movie]\n</title>\n\
                        <director>\n[type: str]\n[The director of the movie]\n</director>\n\
                        </movie>\n\
                        </movies>";
        assert_eq!(render_template(&root, false), expected);
    }

    #[test]
    fn test_default_description() {
        let root = Descriptor::object(
            "root",
            "SimpleModel",
            "",
            vec![FieldDef::required(Descriptor::scalar(
                "field_without_description",
                ScalarType::String,
                "",
            ))],
        );
        assert!(render_template(&root, true).contains("Description of field_without_description"));
    }

    #[test]
    fn test_deterministic_output() {
        let a = render_template(&action_root(), true);
        let b = render_template(&action_root(), true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_optional_defers_to_inner() {
        let root = Descriptor::object(
            "root",
            "Root",
            "",
            vec![FieldDef::optional(Descriptor::optional(Descriptor::scalar(
                "note",
                ScalarType::String,
                "An optional note",
            )))],
        );
        let out = render_template(&root, false);
        assert_eq!(out, "<note>\n[type: str]\n[An optional note]\n</note>");
    }
}
