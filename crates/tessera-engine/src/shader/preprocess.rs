//! Source rewriting applied before compilation.

use super::ShaderStage;

const DEFAULT_VERSION: &str = "#version 450";

/// Injects `#define`s and a default precision statement.
///
/// Injected lines go directly after the `#version` directive (one is added if
/// the source has none). A precision statement is only added when the source
/// does not declare one itself: `highp` for vertex, `mediump` for fragment.
pub fn preprocess(source: &str, stage: ShaderStage, defines: &[(String, String)]) -> String {
    let mut header = String::new();
    for (name, value) in defines {
        header.push_str("#define ");
        header.push_str(name);
        if !value.is_empty() {
            header.push(' ');
            header.push_str(value);
        }
        header.push('\n');
    }

    if !declares_precision(source) {
        header.push_str(match stage {
            ShaderStage::Vertex => "precision highp float;\n",
            ShaderStage::Fragment => "precision mediump float;\n",
        });
    }

    let mut out = String::with_capacity(source.len() + header.len() + DEFAULT_VERSION.len() + 1);
    match find_version_line(source) {
        Some(end) => {
            out.push_str(&source[..end]);
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&header);
            out.push_str(&source[end..]);
        }
        None => {
            out.push_str(DEFAULT_VERSION);
            out.push('\n');
            out.push_str(&header);
            out.push_str(source);
        }
    }
    out
}

/// Expands the multi-texture markers of a batch fragment template.
///
/// - `%count%` becomes the unit count
/// - `%samplers%` declares `uSampler{i}` textures and `uSamplerState{i}`
///   samplers in descriptor set 1 (texture at `2i`, sampler at `2i + 1`)
/// - `%forloop%` selects the sample for `textureId`
pub fn expand_multi_texture(template: &str, units: u32) -> String {
    let units = units.max(1);

    let mut samplers = String::new();
    for i in 0..units {
        samplers.push_str(&format!(
            "layout(set = 1, binding = {}) uniform texture2D uSampler{i};\n\
             layout(set = 1, binding = {}) uniform sampler uSamplerState{i};\n",
            2 * i,
            2 * i + 1,
        ));
    }

    let mut forloop = String::new();
    for i in 0..units {
        if i > 0 {
            forloop.push_str("\n    else ");
        }
        forloop.push_str(&format!(
            "if (textureId == {i}) {{\n        \
             color = textureGrad(sampler2D(uSampler{i}, uSamplerState{i}), vTextureCoord, dx, dy);\n    \
             }}"
        ));
    }

    template
        .replace("%count%", &units.to_string())
        .replace("%samplers%", &samplers)
        .replace("%forloop%", &forloop)
}

fn declares_precision(source: &str) -> bool {
    source
        .lines()
        .any(|l| l.trim_start().starts_with("precision ") && l.contains("float"))
}

/// Byte offset just past the `#version` line, if any.
fn find_version_line(source: &str) -> Option<usize> {
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        if line.trim_start().starts_with("#version") {
            return Some(offset + line.len());
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defines_follow_version_line() {
        let src = "#version 450\nvoid main() {}\n";
        let out = preprocess(src, ShaderStage::Vertex, &defines(&[("FOO", "1"), ("BAR", "")]));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "#version 450");
        assert_eq!(lines[1], "#define FOO 1");
        assert_eq!(lines[2], "#define BAR");
        assert_eq!(lines[3], "precision highp float;");
        assert_eq!(lines[4], "void main() {}");
    }

    #[test]
    fn fragment_precision_is_mediump() {
        let out = preprocess("#version 450\n", ShaderStage::Fragment, &[]);
        assert!(out.contains("precision mediump float;"));
    }

    #[test]
    fn existing_precision_is_kept() {
        let src = "#version 450\nprecision lowp float;\nvoid main() {}\n";
        let out = preprocess(src, ShaderStage::Fragment, &[]);
        assert_eq!(out.matches("precision").count(), 1);
    }

    #[test]
    fn missing_version_is_added() {
        let out = preprocess("void main() {}\n", ShaderStage::Vertex, &[]);
        assert!(out.starts_with("#version 450\n"));
    }

    #[test]
    fn multi_texture_expansion_declares_each_unit() {
        let out = expand_multi_texture("%count%\n%samplers%\n%forloop%", 3);
        assert!(out.starts_with("3\n"));
        assert!(out.contains("uniform texture2D uSampler2;"));
        assert!(out.contains("binding = 5) uniform sampler uSamplerState2;"));
        assert!(out.contains("else if (textureId == 2)"));
        assert!(!out.contains('%'));
    }
}
