//! SPIR-V 二进制的反射
//!
//! 只关心生成 pipeline layout 所需的信息：descriptor 的 set/binding/type/count，
//! push constant block 的大小，以及入口函数对应的 shader stage。

use std::collections::{HashMap, HashSet};

use ash::vk;

use crate::error::{RhiError, RhiResult};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

mod op {
    pub const ENTRY_POINT: u32 = 15;
    pub const TYPE_VOID: u32 = 19;
    pub const TYPE_BOOL: u32 = 20;
    pub const TYPE_INT: u32 = 21;
    pub const TYPE_FLOAT: u32 = 22;
    pub const TYPE_VECTOR: u32 = 23;
    pub const TYPE_MATRIX: u32 = 24;
    pub const TYPE_IMAGE: u32 = 25;
    pub const TYPE_SAMPLER: u32 = 26;
    pub const TYPE_SAMPLED_IMAGE: u32 = 27;
    pub const TYPE_ARRAY: u32 = 28;
    pub const TYPE_RUNTIME_ARRAY: u32 = 29;
    pub const TYPE_STRUCT: u32 = 30;
    pub const TYPE_POINTER: u32 = 32;
    pub const CONSTANT: u32 = 43;
    pub const SPEC_CONSTANT: u32 = 50;
    pub const VARIABLE: u32 = 59;
    pub const DECORATE: u32 = 71;
    pub const MEMBER_DECORATE: u32 = 72;
    pub const TYPE_ACCELERATION_STRUCTURE: u32 = 5341;
}

mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

mod storage_class {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const UNIFORM: u32 = 2;
    pub const PUSH_CONSTANT: u32 = 9;
    pub const STORAGE_BUFFER: u32 = 12;
}

/// image 的 Dim 操作数
const DIM_BUFFER: u32 = 5;
const DIM_SUBPASS_DATA: u32 = 6;

/// 类型嵌套的最大层数，超过时认为 module 有误（例如循环引用的类型 id）
const MAX_TYPE_DEPTH: u32 = 64;

/// shader 中声明的一个 descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    /// 数组长度；runtime array 为 0，非数组为 1
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectedPushConstant {
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct ShaderReflection {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: String,
    /// 按 (set, binding) 排序
    pub bindings: Vec<ReflectedBinding>,
    pub push_constant: Option<ReflectedPushConstant>,
}

/// 字节流转为 SPIR-V word，并处理大小端
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.len() % 4 != 0 || bytes.len() < 20 {
        return Err(RhiError::ShaderReflection(format!("invalid SPIR-V length: {} bytes", bytes.len())));
    }
    let mut words: Vec<u32> = bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
    if words[0] == SPIRV_MAGIC.swap_bytes() {
        words.iter_mut().for_each(|w| *w = w.swap_bytes());
    }
    if words[0] != SPIRV_MAGIC {
        return Err(RhiError::ShaderReflection(format!("invalid SPIR-V magic: {:#010x}", words[0])));
    }
    Ok(words)
}

#[derive(Debug, Clone)]
enum SpirvType {
    Scalar { bytes: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    Image { dim: u32, sampled: u32 },
    Sampler,
    SampledImage,
    Array { element: u32, length: u32 },
    RuntimeArray { element: u32 },
    Struct { members: Vec<u32> },
    Pointer { pointee: u32 },
    AccelerationStructure,
    Opaque,
}

#[derive(Default)]
struct Module {
    entry_points: Vec<(u32, String)>,
    types: HashMap<u32, SpirvType>,
    constants: HashMap<u32, u32>,
    variables: Vec<(u32, u32, u32)>,

    sets: HashMap<u32, u32>,
    bindings: HashMap<u32, u32>,
    blocks: HashSet<u32>,
    buffer_blocks: HashSet<u32>,
    array_strides: HashMap<u32, u32>,
    member_offsets: HashMap<(u32, u32), u32>,
    member_matrix_strides: HashMap<(u32, u32), u32>,
}

/// 从 SPIR-V 中提取 `entry_point` 的 stage、descriptor 与 push constant
pub fn reflect_spirv(words: &[u32], entry_point: &str) -> RhiResult<ShaderReflection> {
    let module = Module::parse(words)?;

    let stage = module
        .entry_points
        .iter()
        .find(|(_, name)| name == entry_point)
        .map(|(model, _)| execution_model_stage(*model))
        .ok_or_else(|| RhiError::ShaderReflection(format!("entry point `{entry_point}` not found")))?
        .ok_or_else(|| RhiError::ShaderReflection(format!("unsupported execution model for `{entry_point}`")))?;

    let mut bindings = Vec::new();
    let mut push_constant = None;
    for &(result_type, id, storage) in &module.variables {
        let pointee = match module.types.get(&result_type) {
            Some(SpirvType::Pointer { pointee }) => *pointee,
            _ => continue,
        };

        if storage == storage_class::PUSH_CONSTANT {
            push_constant = Some(module.push_constant_range(pointee)?);
            continue;
        }

        let (Some(&set), Some(&binding)) = (module.sets.get(&id), module.bindings.get(&id)) else {
            continue;
        };
        let (inner, count) = module.unwrap_arrays(pointee).ok_or_else(|| {
            RhiError::ShaderReflection(format!("array type nested too deeply at set {set} binding {binding}"))
        })?;
        let descriptor_type = module.descriptor_type(inner, storage).ok_or_else(|| {
            RhiError::ShaderReflection(format!("unsupported descriptor at set {set} binding {binding}"))
        })?;
        bindings.push(ReflectedBinding {
            set,
            binding,
            descriptor_type,
            count,
        });
    }
    bindings.sort_by_key(|b| (b.set, b.binding));

    Ok(ShaderReflection {
        stage,
        entry_point: entry_point.to_string(),
        bindings,
        push_constant,
    })
}

fn execution_model_stage(model: u32) -> Option<vk::ShaderStageFlags> {
    Some(match model {
        0 => vk::ShaderStageFlags::VERTEX,
        1 => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        2 => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        3 => vk::ShaderStageFlags::GEOMETRY,
        4 => vk::ShaderStageFlags::FRAGMENT,
        5 => vk::ShaderStageFlags::COMPUTE,
        5364 => vk::ShaderStageFlags::TASK_EXT,
        5365 => vk::ShaderStageFlags::MESH_EXT,
        _ => return None,
    })
}

/// 以 NUL 结尾、按 word 填充的字符串
fn literal_string(words: &[u32]) -> String {
    let bytes: Vec<u8> =
        words.iter().flat_map(|w| w.to_le_bytes()).take_while(|b| *b != 0).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl Module {
    fn parse(words: &[u32]) -> RhiResult<Self> {
        if words.len() < 5 || words[0] != SPIRV_MAGIC {
            return Err(RhiError::ShaderReflection("invalid SPIR-V header".to_string()));
        }

        let mut module = Module::default();
        let mut cursor = 5;
        while cursor < words.len() {
            let word_count = (words[cursor] >> 16) as usize;
            let opcode = words[cursor] & 0xffff;
            if word_count == 0 || cursor + word_count > words.len() {
                return Err(RhiError::ShaderReflection(format!("truncated instruction at word {cursor}")));
            }
            module.parse_instruction(opcode, &words[cursor + 1..cursor + word_count])?;
            cursor += word_count;
        }
        Ok(module)
    }

    fn parse_instruction(&mut self, opcode: u32, operands: &[u32]) -> RhiResult<()> {
        let need = |n: usize| {
            if operands.len() < n {
                Err(RhiError::ShaderReflection(format!("opcode {opcode} expects {n} operands")))
            } else {
                Ok(())
            }
        };

        match opcode {
            op::ENTRY_POINT => {
                need(3)?;
                self.entry_points.push((operands[0], literal_string(&operands[2..])));
            }
            op::TYPE_VOID => {
                need(1)?;
                self.types.insert(operands[0], SpirvType::Opaque);
            }
            op::TYPE_BOOL => {
                need(1)?;
                self.types.insert(operands[0], SpirvType::Scalar { bytes: 4 });
            }
            op::TYPE_INT | op::TYPE_FLOAT => {
                need(2)?;
                self.types.insert(operands[0], SpirvType::Scalar { bytes: operands[1] / 8 });
            }
            op::TYPE_VECTOR => {
                need(3)?;
                let ty = SpirvType::Vector {
                    component: operands[1],
                    count: operands[2],
                };
                self.types.insert(operands[0], ty);
            }
            op::TYPE_MATRIX => {
                need(3)?;
                let ty = SpirvType::Matrix {
                    column: operands[1],
                    count: operands[2],
                };
                self.types.insert(operands[0], ty);
            }
            op::TYPE_IMAGE => {
                need(7)?;
                let ty = SpirvType::Image {
                    dim: operands[2],
                    sampled: operands[6],
                };
                self.types.insert(operands[0], ty);
            }
            op::TYPE_SAMPLER => {
                need(1)?;
                self.types.insert(operands[0], SpirvType::Sampler);
            }
            op::TYPE_SAMPLED_IMAGE => {
                need(2)?;
                self.types.insert(operands[0], SpirvType::SampledImage);
            }
            op::TYPE_ARRAY => {
                need(3)?;
                let ty = SpirvType::Array {
                    element: operands[1],
                    length: operands[2],
                };
                self.types.insert(operands[0], ty);
            }
            op::TYPE_RUNTIME_ARRAY => {
                need(2)?;
                self.types.insert(operands[0], SpirvType::RuntimeArray { element: operands[1] });
            }
            op::TYPE_STRUCT => {
                need(1)?;
                let ty = SpirvType::Struct {
                    members: operands[1..].to_vec(),
                };
                self.types.insert(operands[0], ty);
            }
            op::TYPE_POINTER => {
                need(3)?;
                self.types.insert(operands[0], SpirvType::Pointer { pointee: operands[2] });
            }
            op::TYPE_ACCELERATION_STRUCTURE => {
                need(1)?;
                self.types.insert(operands[0], SpirvType::AccelerationStructure);
            }
            op::CONSTANT | op::SPEC_CONSTANT => {
                need(3)?;
                self.constants.insert(operands[1], operands[2]);
            }
            op::VARIABLE => {
                need(3)?;
                self.variables.push((operands[0], operands[1], operands[2]));
            }
            op::DECORATE => {
                need(2)?;
                let (target, deco) = (operands[0], operands[1]);
                match deco {
                    decoration::BLOCK => {
                        self.blocks.insert(target);
                    }
                    decoration::BUFFER_BLOCK => {
                        self.buffer_blocks.insert(target);
                    }
                    decoration::DESCRIPTOR_SET | decoration::BINDING | decoration::ARRAY_STRIDE => {
                        need(3)?;
                        let map = match deco {
                            decoration::DESCRIPTOR_SET => &mut self.sets,
                            decoration::BINDING => &mut self.bindings,
                            _ => &mut self.array_strides,
                        };
                        map.insert(target, operands[2]);
                    }
                    _ => {}
                }
            }
            op::MEMBER_DECORATE => {
                need(3)?;
                let key = (operands[0], operands[1]);
                match operands[2] {
                    decoration::OFFSET => {
                        need(4)?;
                        self.member_offsets.insert(key, operands[3]);
                    }
                    decoration::MATRIX_STRIDE => {
                        need(4)?;
                        self.member_matrix_strides.insert(key, operands[3]);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// 去掉数组包装，返回元素类型以及总长度
    ///
    /// 嵌套超过 [`MAX_TYPE_DEPTH`] 层（包括循环引用）时返回 None
    fn unwrap_arrays(&self, mut ty: u32) -> Option<(u32, u32)> {
        let mut count = 1u32;
        for _ in 0..MAX_TYPE_DEPTH {
            match self.types.get(&ty) {
                Some(SpirvType::Array { element, length }) => {
                    count = count.saturating_mul(self.constants.get(length).copied().unwrap_or(1));
                    ty = *element;
                }
                Some(SpirvType::RuntimeArray { element }) => {
                    count = 0;
                    ty = *element;
                }
                _ => return Some((ty, count)),
            }
        }
        None
    }

    fn descriptor_type(&self, ty: u32, storage: u32) -> Option<vk::DescriptorType> {
        let spirv_type = self.types.get(&ty)?;
        match (storage, spirv_type) {
            (storage_class::UNIFORM_CONSTANT, SpirvType::Sampler) => Some(vk::DescriptorType::SAMPLER),
            (storage_class::UNIFORM_CONSTANT, SpirvType::SampledImage) => {
                Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            }
            (storage_class::UNIFORM_CONSTANT, SpirvType::Image { dim, sampled }) => Some(match (*dim, *sampled) {
                (DIM_BUFFER, 2) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
                (DIM_BUFFER, _) => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
                (DIM_SUBPASS_DATA, _) => vk::DescriptorType::INPUT_ATTACHMENT,
                (_, 2) => vk::DescriptorType::STORAGE_IMAGE,
                _ => vk::DescriptorType::SAMPLED_IMAGE,
            }),
            (storage_class::UNIFORM_CONSTANT, SpirvType::AccelerationStructure) => {
                Some(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            }
            (storage_class::UNIFORM, SpirvType::Struct { .. }) => {
                if self.buffer_blocks.contains(&ty) {
                    Some(vk::DescriptorType::STORAGE_BUFFER)
                } else {
                    Some(vk::DescriptorType::UNIFORM_BUFFER)
                }
            }
            (storage_class::STORAGE_BUFFER, SpirvType::Struct { .. }) => Some(vk::DescriptorType::STORAGE_BUFFER),
            _ => None,
        }
    }

    fn push_constant_range(&self, block: u32) -> RhiResult<ReflectedPushConstant> {
        let Some(SpirvType::Struct { members }) = self.types.get(&block) else {
            return Err(RhiError::ShaderReflection("push constant is not a struct".to_string()));
        };
        let offset = (0..members.len() as u32)
            .filter_map(|i| self.member_offsets.get(&(block, i)).copied())
            .min()
            .unwrap_or(0);
        let end = self
            .type_size(block, None, 0)
            .ok_or_else(|| RhiError::ShaderReflection("push constant block size overflows".to_string()))?;
        Ok(ReflectedPushConstant {
            offset,
            size: end.saturating_sub(offset),
        })
    }

    /// 类型占用的字节数，struct 按最后一个 member 的 offset + size 计算
    ///
    /// 溢出或者嵌套超过 [`MAX_TYPE_DEPTH`] 层时返回 None
    fn type_size(&self, ty: u32, matrix_stride: Option<u32>, depth: u32) -> Option<u32> {
        if depth >= MAX_TYPE_DEPTH {
            return None;
        }
        let depth = depth + 1;
        match self.types.get(&ty) {
            Some(SpirvType::Scalar { bytes }) => Some(*bytes),
            Some(SpirvType::Vector { component, count }) => {
                self.type_size(*component, None, depth)?.checked_mul(*count)
            }
            Some(SpirvType::Matrix { column, count }) => {
                let column_size = match matrix_stride {
                    Some(stride) => stride,
                    None => self.type_size(*column, None, depth)?,
                };
                column_size.checked_mul(*count)
            }
            Some(SpirvType::Array { element, length }) => {
                let length = self.constants.get(length).copied().unwrap_or(1);
                let stride = match self.array_strides.get(&ty) {
                    Some(&stride) => stride,
                    None => self.type_size(*element, None, depth)?,
                };
                stride.checked_mul(length)
            }
            Some(SpirvType::Struct { members }) => members.iter().enumerate().try_fold(0u32, |end, (i, member)| {
                let key = (ty, i as u32);
                let offset = self.member_offsets.get(&key).copied().unwrap_or(0);
                let size = self.type_size(*member, self.member_matrix_strides.get(&key).copied(), depth)?;
                Some(end.max(offset.checked_add(size)?))
            }),
            _ => Some(0),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_spirv {
    //! 测试用的极简 SPIR-V 汇编

    use super::*;

    pub fn inst(opcode: u32, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | opcode];
        words.extend_from_slice(operands);
        words
    }

    pub fn string(s: &str) -> Vec<u32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }

    pub fn entry_point(model: u32, id: u32, name: &str) -> Vec<u32> {
        let mut operands = vec![model, id];
        operands.extend(string(name));
        inst(op::ENTRY_POINT, &operands)
    }

    pub fn module(instructions: Vec<Vec<u32>>) -> Vec<u32> {
        let mut words = vec![SPIRV_MAGIC, 0x0001_0500, 0, 200, 0];
        instructions.into_iter().for_each(|i| words.extend(i));
        words
    }

    pub fn decorate_binding(id: u32, set: u32, binding: u32) -> Vec<Vec<u32>> {
        vec![
            inst(op::DECORATE, &[id, decoration::DESCRIPTOR_SET, set]),
            inst(op::DECORATE, &[id, decoration::BINDING, binding]),
        ]
    }

    /// float/vec4/uint 等基础类型：%2 float, %3 vec4, %4 uint
    pub fn basic_types() -> Vec<Vec<u32>> {
        vec![
            inst(op::TYPE_FLOAT, &[2, 32]),
            inst(op::TYPE_VECTOR, &[3, 2, 4]),
            inst(op::TYPE_INT, &[4, 32, 0]),
        ]
    }

    /// 一个 uniform buffer：`layout(set, binding) uniform U { vec4 }`，ids 从 base 开始占用 3 个
    pub fn uniform_buffer(base: u32, set: u32, binding: u32) -> Vec<Vec<u32>> {
        let (block, ptr, var) = (base, base + 1, base + 2);
        let mut insts = vec![
            inst(op::DECORATE, &[block, decoration::BLOCK]),
            inst(op::TYPE_STRUCT, &[block, 3]),
            inst(op::TYPE_POINTER, &[ptr, storage_class::UNIFORM, block]),
            inst(op::VARIABLE, &[ptr, var, storage_class::UNIFORM]),
        ];
        insts.extend(decorate_binding(var, set, binding));
        insts
    }

    /// `layout(set, binding) uniform texture2D textures[]`，ids 从 base 开始占用 4 个
    pub fn runtime_texture_array(base: u32, set: u32, binding: u32) -> Vec<Vec<u32>> {
        let (image, array, ptr, var) = (base, base + 1, base + 2, base + 3);
        let mut insts = vec![
            inst(op::TYPE_IMAGE, &[image, 2, 1, 0, 0, 0, 1, 0]),
            inst(op::TYPE_RUNTIME_ARRAY, &[array, image]),
            inst(op::TYPE_POINTER, &[ptr, storage_class::UNIFORM_CONSTANT, array]),
            inst(op::VARIABLE, &[ptr, var, storage_class::UNIFORM_CONSTANT]),
        ];
        insts.extend(decorate_binding(var, set, binding));
        insts
    }
}

#[cfg(test)]
mod tests {
    use super::test_spirv::*;
    use super::*;

    fn compute_module() -> Vec<u32> {
        let mut insts = vec![entry_point(5, 1, "main")];
        insts.extend(basic_types());

        // push constant: struct { vec4 a; uint b; } => 16 + 4
        insts.extend([
            inst(op::DECORATE, &[20, decoration::BLOCK]),
            inst(op::MEMBER_DECORATE, &[20, 0, decoration::OFFSET, 0]),
            inst(op::MEMBER_DECORATE, &[20, 1, decoration::OFFSET, 16]),
            inst(op::TYPE_STRUCT, &[20, 3, 4]),
            inst(op::TYPE_POINTER, &[21, storage_class::PUSH_CONSTANT, 20]),
            inst(op::VARIABLE, &[21, 22, storage_class::PUSH_CONSTANT]),
        ]);

        // storage image: set 0 binding 1
        insts.extend([
            inst(op::TYPE_IMAGE, &[5, 2, 1, 0, 0, 0, 2, 4]),
            inst(op::TYPE_POINTER, &[6, storage_class::UNIFORM_CONSTANT, 5]),
            inst(op::VARIABLE, &[6, 10, storage_class::UNIFORM_CONSTANT]),
        ]);
        insts.extend(decorate_binding(10, 0, 1));

        // uniform buffer array[3]: set 0 binding 0
        insts.extend([
            inst(op::DECORATE, &[30, decoration::BLOCK]),
            inst(op::TYPE_STRUCT, &[30, 3]),
            inst(op::CONSTANT, &[4, 31, 3]),
            inst(op::TYPE_ARRAY, &[32, 30, 31]),
            inst(op::TYPE_POINTER, &[33, storage_class::UNIFORM, 32]),
            inst(op::VARIABLE, &[33, 34, storage_class::UNIFORM]),
        ]);
        insts.extend(decorate_binding(34, 0, 0));

        // runtime array of textures: set 1 binding 0
        insts.extend(runtime_texture_array(40, 1, 0));

        module(insts)
    }

    #[test]
    fn test_reflect_compute_module() {
        let reflection = reflect_spirv(&compute_module(), "main").unwrap();
        assert_eq!(reflection.stage, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(
            reflection.bindings,
            vec![
                ReflectedBinding {
                    set: 0,
                    binding: 0,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    count: 3
                },
                ReflectedBinding {
                    set: 0,
                    binding: 1,
                    descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                    count: 1
                },
                ReflectedBinding {
                    set: 1,
                    binding: 0,
                    descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
                    count: 0
                },
            ]
        );
        assert_eq!(reflection.push_constant, Some(ReflectedPushConstant { offset: 0, size: 20 }));
    }

    #[test]
    fn test_storage_buffer_and_sampler() {
        let mut insts = vec![entry_point(4, 1, "fs_main")];
        insts.extend(basic_types());
        insts.extend([
            inst(op::DECORATE, &[50, decoration::BLOCK]),
            inst(op::TYPE_RUNTIME_ARRAY, &[49, 3]),
            inst(op::TYPE_STRUCT, &[50, 49]),
            inst(op::TYPE_POINTER, &[51, storage_class::STORAGE_BUFFER, 50]),
            inst(op::VARIABLE, &[51, 52, storage_class::STORAGE_BUFFER]),
            inst(op::TYPE_SAMPLER, &[60]),
            inst(op::TYPE_POINTER, &[61, storage_class::UNIFORM_CONSTANT, 60]),
            inst(op::VARIABLE, &[61, 62, storage_class::UNIFORM_CONSTANT]),
        ]);
        insts.extend(decorate_binding(52, 2, 3));
        insts.extend(decorate_binding(62, 0, 0));

        let reflection = reflect_spirv(&module(insts), "fs_main").unwrap();
        assert_eq!(reflection.stage, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(reflection.bindings.len(), 2);
        assert_eq!(reflection.bindings[0].descriptor_type, vk::DescriptorType::SAMPLER);
        assert_eq!(reflection.bindings[1].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!((reflection.bindings[1].set, reflection.bindings[1].binding), (2, 3));
        assert_eq!(reflection.push_constant, None);
    }

    #[test]
    fn test_missing_entry_point() {
        let err = reflect_spirv(&compute_module(), "not_main").unwrap_err();
        assert!(matches!(err, RhiError::ShaderReflection(_)));
    }

    #[test]
    fn test_bytes_roundtrip_and_bad_magic() {
        let words = compute_module();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(spirv_words(&bytes).unwrap(), words);

        let swapped: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        assert_eq!(spirv_words(&swapped).unwrap(), words);

        let mut broken = bytes.clone();
        broken[0] = 0;
        assert!(spirv_words(&broken).is_err());
        assert!(spirv_words(&bytes[..7]).is_err());
    }

    #[test]
    fn test_truncated_instruction() {
        let mut words = compute_module();
        // 最后一条指令声称比实际更长
        let last = words.len() - 4;
        words[last] |= 0x00ff_0000;
        assert!(reflect_spirv(&words, "main").is_err());
    }

    #[test]
    fn test_cyclic_array_type_is_rejected() {
        let mut insts = vec![entry_point(5, 1, "main")];
        insts.extend(basic_types());
        // %70 = array<%71, 2>，%71 = array<%70, 2>
        insts.extend([
            inst(op::CONSTANT, &[4, 69, 2]),
            inst(op::TYPE_ARRAY, &[70, 71, 69]),
            inst(op::TYPE_ARRAY, &[71, 70, 69]),
            inst(op::TYPE_POINTER, &[72, storage_class::UNIFORM_CONSTANT, 70]),
            inst(op::VARIABLE, &[72, 73, storage_class::UNIFORM_CONSTANT]),
        ]);
        insts.extend(decorate_binding(73, 0, 0));

        let err = reflect_spirv(&module(insts), "main").unwrap_err();
        assert!(matches!(err, RhiError::ShaderReflection(_)));
    }

    #[test]
    fn test_push_constant_size_overflow_is_rejected() {
        let mut insts = vec![entry_point(5, 1, "main")];
        insts.extend(basic_types());
        // struct { vec4 data[0x1000_0000]; }，16 * 0x1000_0000 超出 u32
        insts.extend([
            inst(op::CONSTANT, &[4, 80, 0x1000_0000]),
            inst(op::TYPE_ARRAY, &[81, 3, 80]),
            inst(op::DECORATE, &[82, decoration::BLOCK]),
            inst(op::MEMBER_DECORATE, &[82, 0, decoration::OFFSET, 0]),
            inst(op::TYPE_STRUCT, &[82, 81]),
            inst(op::TYPE_POINTER, &[83, storage_class::PUSH_CONSTANT, 82]),
            inst(op::VARIABLE, &[83, 84, storage_class::PUSH_CONSTANT]),
        ]);

        let err = reflect_spirv(&module(insts), "main").unwrap_err();
        assert!(matches!(err, RhiError::ShaderReflection(_)));
    }

    #[test]
    fn test_self_referencing_struct_is_rejected() {
        let mut insts = vec![entry_point(5, 1, "main")];
        insts.extend(basic_types());
        insts.extend([
            inst(op::DECORATE, &[90, decoration::BLOCK]),
            inst(op::TYPE_STRUCT, &[90, 3, 90]),
            inst(op::TYPE_POINTER, &[91, storage_class::PUSH_CONSTANT, 90]),
            inst(op::VARIABLE, &[91, 92, storage_class::PUSH_CONSTANT]),
        ]);

        assert!(reflect_spirv(&module(insts), "main").is_err());
    }
}
