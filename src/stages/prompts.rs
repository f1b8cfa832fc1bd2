//! Prompt templates sent to the coding agent during app generation.
//!
//! - **Manifest prompt**: prepend the Spaces YAML header to `README.md`
//! - **App prompt**: write `app.py` and `requirements.txt`

/// Gradio release pinned in the Space header and in `requirements.txt`.
pub const GRADIO_VERSION: &str = "5.49.1";

/// Build the prompt that adds the Spaces YAML front matter to `README.md`.
pub fn build_manifest_prompt() -> String {
    format!(
        "Please add a HuggingFace Spaces YAML header to the README.md file.\n\n\
         Refer to https://huggingface.co/docs/hub/en/spaces-config-reference for the format.\n\n\
         ## Requirements\n\n\
         1. Put the YAML front matter at the very beginning of README.md, before any content.\n\
         2. Use this structure:\n\
         ---\n\
         title: [descriptive title for this project]\n\
         emoji: [single emoji that fits the project]\n\
         colorFrom: [one of red, yellow, green, blue, indigo, purple, pink, gray]\n\
         colorTo: [another color from the same list]\n\
         sdk: gradio\n\
         sdk_version: {version}\n\
         app_file: app.py\n\
         pinned: false\n\
         short_description: [one sentence, at most ~100 characters, saying what the project does]\n\
         hardware: zerogpu\n\
         ---\n\
         3. short_description is required and must be a complete sentence.\n\
         4. If README.md exists, insert the header at the top and keep the existing content.\n\
         5. If README.md does not exist, create it with the header and a brief project description.\n\n\
         Please proceed with adding this header now.",
        version = GRADIO_VERSION
    )
}

/// Build the prompt that creates the demo app and its requirements.
pub fn build_app_prompt(languages: &[String]) -> String {
    let mut prompt = String::from(
        "Please create a Gradio app (app.py) that demonstrates this project.\n\n",
    );

    if !languages.is_empty() {
        prompt.push_str(&format!(
            "The repository is written in: {}.\n\n",
            languages.join(", ")
        ));
    }

    prompt.push_str("## Requirements\n\n");
    prompt.push_str("1. Create app.py in the repository root using `import gradio as gr`.\n");
    prompt.push_str(
        "2. If the project uses GPU libraries (torch, tensorflow, ...), `import spaces` \
         BEFORE any of them, and decorate GPU work with `@spaces.GPU`.\n",
    );
    prompt.push_str(
        "3. Build a simple, working demo of the project's main feature: an inference \
         interface for models, or the main entry point for tools and libraries.\n",
    );
    prompt.push_str("4. Include clear labels, a title, a description, and example inputs.\n");
    prompt.push_str("5. Handle errors so the app keeps running on bad input.\n");
    prompt.push_str(&format!(
        "6. Follow Gradio {} conventions; the app must run with `python app.py`.\n\n",
        GRADIO_VERSION
    ));

    prompt.push_str("## requirements.txt\n\n");
    prompt.push_str(&format!(
        "- gradio=={} as the first line (exactly this version)\n",
        GRADIO_VERSION
    ));
    prompt.push_str("- If httpx is listed, pin it to httpx>=0.24.1,<1.0\n");
    prompt.push_str("- Add `spaces` when using ZeroGPU decorators\n");
    prompt.push_str(
        "- If the project mentions FlashAttention, pin torch with `==` and add the \
         matching prebuilt flash-attn wheel (cp310, cu12, abiFALSE, linux_x86_64)\n",
    );
    prompt.push_str("- Keep the rest minimal and compatible with Python 3.10+\n\n");

    prompt.push_str("Please proceed with creating app.py and requirements.txt now.");
    prompt
}
