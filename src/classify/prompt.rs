//! Prompt assembly for the classification model.

use super::ClassificationRequest;

/// System message sent ahead of every classification prompt.
pub const SYSTEM_PROMPT: &str = "You are a precise text classification assistant.";

const INSTRUCTIONS: &str = "You are a text classification algorithm.

The user will provide you with 3 tables. Table 1 contains one column named input text. Under this column are one or more user input text instances that have to be categorized. Table 2 contains 2 columns, named category and category description. Under the column category you will find the different categories that the user has provided. Under the column category description you will find the descriptions that the user has given for each category. Table 3 contains 2 columns named example input text and desired category. Under the column example input text you will find examples of input text and under the column desired category you will find the corresponding category that the user thinks fits best.

For each input text instance, out of the categories that the user has provided, find the category that fits best. Be sure to also use the category descriptions for this.

Only one category may be picked per input text instance.

Output should be a table with 2 columns: Input text instance and category. Under the column input text instance should be each input text instance the user has provided. Under the column category should be the category the best fitting category.

Here follows the user input:";

const OUTPUT_FORMAT: &str = "Respond with ONLY an array of category assignments in JSON format where each element is an object with \"text\" and \"category\" fields. Nothing else.";

/// A rendered prompt together with the request it was built from.
#[derive(Debug, Clone)]
pub struct BuiltPrompt<'a> {
    pub text: String,
    pub request: &'a ClassificationRequest,
}

/// Render the three tables into the instruction template.
pub fn build_prompt(request: &ClassificationRequest) -> BuiltPrompt<'_> {
    let inputs = bullet_block(request.input_texts.texts().iter().map(|t| t.to_string()));

    let categories = bullet_block(request.categories.entries().iter().map(|c| {
        format!("Category: {}, Description: {}", c.category, c.description)
    }));

    let examples = bullet_block(request.examples.entries().iter().map(|e| {
        format!(
            "Example Text: {}, Desired Category: {}",
            e.text, e.desired_category
        )
    }));

    let text = format!(
        "{INSTRUCTIONS}\n\nTable 1: \n{inputs}\n\nTable 2: \n{categories}\n\nTable 3: \n{examples}\n\n{OUTPUT_FORMAT}"
    );

    BuiltPrompt { text, request }
}

fn bullet_block(lines: impl Iterator<Item = String>) -> String {
    lines
        .map(|line| format!("- {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Category, CategorySet, Example, ExampleSet, InputTextSet};

    fn scenario_request() -> ClassificationRequest {
        ClassificationRequest {
            input_texts: InputTextSet::new(vec![
                "Great service!".into(),
                "Where is my order?".into(),
            ])
            .unwrap(),
            categories: CategorySet::new(vec![
                Category::new("Positive", "praise"),
                Category::new("Question", "asks for help"),
            ])
            .unwrap(),
            examples: ExampleSet::new(vec![Example::new("I love it", "Positive")]).unwrap(),
        }
    }

    #[test]
    fn test_prompt_contains_all_tables() {
        let request = scenario_request();
        let prompt = build_prompt(&request);

        assert!(prompt.text.contains("- Great service!"));
        assert!(prompt.text.contains("- Where is my order?"));
        assert!(prompt.text.contains("- Category: Positive, Description: praise"));
        assert!(prompt.text.contains("- Category: Question, Description: asks for help"));
        assert!(prompt
            .text
            .contains("- Example Text: I love it, Desired Category: Positive"));
    }

    #[test]
    fn test_prompt_block_order() {
        let request = scenario_request();
        let text = build_prompt(&request).text;

        let instructions = text.find("You are a text classification algorithm.").unwrap();
        let table1 = text.find("Table 1: ").unwrap();
        let table2 = text.find("Table 2: ").unwrap();
        let table3 = text.find("Table 3: ").unwrap();
        let format = text.find("Respond with ONLY").unwrap();

        assert!(instructions < table1);
        assert!(table1 < text.find("- Great service!").unwrap());
        assert!(table1 < table2 && table2 < table3 && table3 < format);
        assert!(text.ends_with("Nothing else."));
    }

    #[test]
    fn test_every_category_and_example_present() {
        let categories: Vec<Category> = (0..12)
            .map(|i| Category::new(format!("cat-{}", i), format!("description {}", i)))
            .collect();
        let examples: Vec<Example> = (0..12)
            .map(|i| Example::new(format!("example text {}", i), format!("cat-{}", i)))
            .collect();
        let request = ClassificationRequest {
            input_texts: InputTextSet::new(vec!["x".into()]).unwrap(),
            categories: CategorySet::new(categories.clone()).unwrap(),
            examples: ExampleSet::new(examples.clone()).unwrap(),
        };

        let text = build_prompt(&request).text;
        for category in &categories {
            assert!(text.contains(&category.category));
        }
        for example in &examples {
            assert!(text.contains(&example.text));
        }
    }
}
