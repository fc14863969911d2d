//! WGSL for the three programs and the layout of their uniform blocks.
//!
//! Uniforms are addressed by the GL-style names the render core looks up;
//! each name maps to a byte offset in the program's uniform block. The WGSL
//! structs below must match these offsets exactly.

use lumen_render::{MAX_SHADER_LIGHTS, ProgramKind};
use std::fmt::Write as _;

/// Scalar or matrix type of one uniform field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Vec3,
    Mat4,
}

impl FieldType {
    pub fn size(self) -> u32 {
        match self {
            FieldType::Int | FieldType::Float => 4,
            FieldType::Vec3 => 12,
            FieldType::Mat4 => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub offset: u32,
    pub ty: FieldType,
}

#[derive(Debug, Clone)]
pub struct UniformLayout {
    pub fields: Vec<UniformField>,
    pub size: u32,
}

impl UniformLayout {
    pub fn field(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

const LIGHTS_OFFSET: u32 = 144;
const LIGHT_STRIDE: u32 = 128;

// (field, offset inside `Light`, type)
const LIGHT_FIELDS: [(&str, u32, FieldType); 10] = [
    ("projlmat", 0, FieldType::Mat4),
    ("dir", 64, FieldType::Vec3),
    ("type", 76, FieldType::Int),
    ("pos", 80, FieldType::Vec3),
    ("range", 92, FieldType::Float),
    ("col", 96, FieldType::Vec3),
    ("attl", 108, FieldType::Float),
    ("attq", 112, FieldType::Float),
    ("spinn", 116, FieldType::Float),
    ("spout", 120, FieldType::Float),
];

pub fn uniform_layout(kind: ProgramKind) -> UniformLayout {
    let field = |name: &str, offset, ty| UniformField {
        name: name.to_string(),
        offset,
        ty,
    };
    match kind {
        ProgramKind::Lit => {
            let mut fields = vec![
                field("view", 0, FieldType::Mat4),
                field("projection", 64, FieldType::Mat4),
                field("cam_pos", 128, FieldType::Vec3),
                field("num_lights", 140, FieldType::Int),
            ];
            for slot in 0..MAX_SHADER_LIGHTS as u32 {
                let base = LIGHTS_OFFSET + slot * LIGHT_STRIDE;
                for (name, offset, ty) in LIGHT_FIELDS {
                    fields.push(field(&format!("lights[{slot}].{name}"), base + offset, ty));
                }
            }
            UniformLayout {
                fields,
                size: LIGHTS_OFFSET + MAX_SHADER_LIGHTS as u32 * LIGHT_STRIDE,
            }
        }
        ProgramKind::ShadowDepth => UniformLayout {
            fields: vec![field("projlmat", 0, FieldType::Mat4)],
            size: 64,
        },
        ProgramKind::CubeDepth => UniformLayout {
            fields: vec![
                field("light_space_matrix", 0, FieldType::Mat4),
                field("light_pos_world", 64, FieldType::Vec3),
                field("light_far_plane", 76, FieldType::Float),
            ],
            size: 80,
        },
    }
}

/// Vertex and instance inputs shared by every program.
const INPUTS: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tex_coord: vec2<f32>,
};

struct InstanceInput {
    @location(3) model_0: vec4<f32>,
    @location(4) model_1: vec4<f32>,
    @location(5) model_2: vec4<f32>,
    @location(6) model_3: vec4<f32>,
    @location(7) color: vec4<f32>,
};

fn model_matrix(instance: InstanceInput) -> mat4x4<f32> {
    return mat4x4<f32>(instance.model_0, instance.model_1, instance.model_2, instance.model_3);
}
"#;

/// Depth-only pass into a 2D shadow map.
pub fn shadow_shader() -> String {
    format!(
        r#"{INPUTS}
struct Shadow {{
    projlmat: mat4x4<f32>,
}};

@group(0) @binding(0)
var<uniform> u: Shadow;

@vertex
fn vs_main(vertex: VertexInput, instance: InstanceInput) -> @builtin(position) vec4<f32> {{
    return u.projlmat * model_matrix(instance) * vec4<f32>(vertex.position, 1.0);
}}
"#
    )
}

/// Depth pass into one cube face. Depth holds light distance over the far plane.
pub fn cube_depth_shader() -> String {
    format!(
        r#"{INPUTS}
struct CubeDepth {{
    light_space_matrix: mat4x4<f32>,
    light_pos_world: vec3<f32>,
    light_far_plane: f32,
}};

@group(0) @binding(0)
var<uniform> u: CubeDepth;

struct CubeOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
}};

@vertex
fn vs_main(vertex: VertexInput, instance: InstanceInput) -> CubeOutput {{
    let world = model_matrix(instance) * vec4<f32>(vertex.position, 1.0);
    var out: CubeOutput;
    out.clip_position = u.light_space_matrix * world;
    // face matrices use bottom-up rows; cube sampling here reads top-down
    out.clip_position.y = -out.clip_position.y;
    out.world_pos = world.xyz;
    return out;
}}

@fragment
fn fs_main(in: CubeOutput) -> @builtin(frag_depth) f32 {{
    return clamp(length(in.world_pos - u.light_pos_world) / u.light_far_plane, 0.0, 1.0);
}}
"#
    )
}

/// Lit pass with per-light shadows.
///
/// Every shadow map gets its own binding: `0..N` for 2D maps and `N..2N` for
/// cube maps, then the comparison sampler.
pub fn lit_shader(far_plane: f32) -> String {
    let n = MAX_SHADER_LIGHTS;
    let mut bindings = String::new();
    let mut flat_cases = String::new();
    let mut cube_cases = String::new();
    for i in 0..n {
        let _ = writeln!(
            bindings,
            "@group(1) @binding({i}) var shadow_map_2d_{i}: texture_depth_2d;"
        );
        let _ = writeln!(
            bindings,
            "@group(1) @binding({}) var shadow_map_cube_{i}: texture_depth_cube;",
            n + i
        );
        let _ = writeln!(
            flat_cases,
            "        case {i}: {{ return textureSampleCompareLevel(shadow_map_2d_{i}, shadow_sampler, uv, depth); }}"
        );
        let _ = writeln!(
            cube_cases,
            "        case {i}: {{ return textureSampleCompareLevel(shadow_map_cube_{i}, shadow_sampler, dir, depth); }}"
        );
    }
    let sampler_binding = 2 * n;

    format!(
        r#"{INPUTS}
struct Light {{
    projlmat: mat4x4<f32>,
    dir: vec3<f32>,
    kind: i32,
    pos: vec3<f32>,
    range: f32,
    col: vec3<f32>,
    attl: f32,
    attq: f32,
    spinn: f32,
    spout: f32,
    _pad: f32,
}};

struct Globals {{
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    cam_pos: vec3<f32>,
    num_lights: i32,
    lights: array<Light, {n}>,
}};

@group(0) @binding(0)
var<uniform> u: Globals;

{bindings}
@group(1) @binding({sampler_binding}) var shadow_sampler: sampler_comparison;

const FAR_PLANE: f32 = {far_plane:?};

fn sample_flat(i: i32, uv: vec2<f32>, depth: f32) -> f32 {{
    switch i {{
{flat_cases}        default: {{ return 1.0; }}
    }}
}}

fn sample_cube(i: i32, dir: vec3<f32>, depth: f32) -> f32 {{
    switch i {{
{cube_cases}        default: {{ return 1.0; }}
    }}
}}

struct LitOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) color: vec4<f32>,
}};

@vertex
fn vs_main(vertex: VertexInput, instance: InstanceInput) -> LitOutput {{
    let model = model_matrix(instance);
    let world = model * vec4<f32>(vertex.position, 1.0);
    var out: LitOutput;
    out.clip_position = u.projection * u.view * world;
    out.world_pos = world.xyz;
    out.world_normal = (model * vec4<f32>(vertex.normal, 0.0)).xyz;
    out.color = instance.color;
    return out;
}}

fn flat_shadow(i: i32, light: Light, world_pos: vec3<f32>, n_dot_l: f32) -> f32 {{
    let clip = light.projlmat * vec4<f32>(world_pos, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, -ndc.y * 0.5 + 0.5);
    if (any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || ndc.z > 1.0) {{
        return 1.0;
    }}
    let bias = max(0.005 * (1.0 - n_dot_l), 0.0005);
    return sample_flat(i, uv, ndc.z - bias);
}}

fn cube_shadow(i: i32, light: Light, world_pos: vec3<f32>) -> f32 {{
    let to_frag = world_pos - light.pos;
    let depth = length(to_frag) / FAR_PLANE;
    if (depth > 1.0) {{
        return 1.0;
    }}
    return sample_cube(i, to_frag, depth - 0.005);
}}

@fragment
fn fs_main(in: LitOutput) -> @location(0) vec4<f32> {{
    let n = normalize(in.world_normal);
    let v = normalize(u.cam_pos - in.world_pos);
    let albedo = in.color.rgb;
    var color = albedo * 0.15;

    for (var i = 0; i < u.num_lights; i++) {{
        let light = u.lights[i];
        var l = -light.dir;
        var attenuation = 1.0;
        var shadow = 1.0;

        if (light.kind != 0) {{
            let to_light = light.pos - in.world_pos;
            let d = length(to_light);
            l = to_light / max(d, 1e-4);
            attenuation = 1.0 / (1.0 + light.attl * d + light.attq * d * d);
        }}

        let n_dot_l = max(dot(n, l), 0.0);
        if (light.kind == 1) {{
            shadow = cube_shadow(i, light, in.world_pos);
        }} else {{
            shadow = flat_shadow(i, light, in.world_pos, n_dot_l);
        }}

        if (light.kind == 2) {{
            let theta = dot(-l, normalize(light.dir));
            let inner = cos(light.spinn);
            let outer = cos(light.spout);
            attenuation *= clamp((theta - outer) / max(inner - outer, 1e-4), 0.0, 1.0);
        }}

        let h = normalize(l + v);
        let specular = pow(max(dot(n, h), 0.0), 32.0) * 0.25;
        color += (albedo * n_dot_l + vec3<f32>(specular)) * light.col * attenuation * shadow;
    }}

    return vec4<f32>(color, in.color.a);
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lit_block_layout() {
        let layout = uniform_layout(ProgramKind::Lit);
        assert_eq!(layout.size, 1424);
        let offset = |name: &str| layout.fields[layout.field(name).unwrap()].offset;
        assert_eq!(offset("num_lights"), 140);
        assert_eq!(offset("lights[0].projlmat"), 144);
        assert_eq!(offset("lights[9].spout"), 144 + 9 * 128 + 120);
        assert!(layout.field("shadow_maps_2d[0]").is_none());
    }

    #[test]
    fn fields_never_overlap() {
        for kind in [ProgramKind::Lit, ProgramKind::ShadowDepth, ProgramKind::CubeDepth] {
            let layout = uniform_layout(kind);
            let mut spans: Vec<(u32, u32)> = layout
                .fields
                .iter()
                .map(|f| (f.offset, f.offset + f.ty.size()))
                .collect();
            spans.sort_unstable();
            for pair in spans.windows(2) {
                assert!(pair[0].1 <= pair[1].0, "{kind:?}: {pair:?}");
            }
            assert!(spans.last().unwrap().1 <= layout.size);
        }
    }

    #[test]
    fn lit_shader_binds_every_shadow_map() {
        let source = lit_shader(400.0);
        assert!(source.contains("var shadow_map_2d_9: texture_depth_2d"));
        assert!(source.contains("@binding(19) var shadow_map_cube_9"));
        assert!(source.contains("@binding(20) var shadow_sampler"));
        assert!(source.contains("const FAR_PLANE: f32 = 400.0;"));
    }
}
