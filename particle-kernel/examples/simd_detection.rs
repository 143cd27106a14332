// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SIMD detection example
//!
//! Prints the CPU capabilities the kernel sees and the step kernel it picks.
//!
//! # Usage
//!
//! ```bash
//! # Default build (SSE2/AVX2 kernels compiled in)
//! cargo run --example simd_detection
//!
//! # Scalar only
//! cargo run --no-default-features --example simd_detection
//!
//! # With the AVX-512 kernel
//! cargo run --features avx512 --example simd_detection
//! ```

use particle_kernel::simd::{detect_capabilities, select_step_kernel, Feature, StepKernel};

fn main() {
    println!("=== SIMD Detection Example ===\n");

    let caps = detect_capabilities();
    println!("CPU Features Detected:");
    for feature in Feature::ALL {
        println!("  {:<10} {}", feature.name(), caps.has(feature));
    }
    println!();
    println!("Max vector width:     {} bytes", caps.max_vector_width);
    println!("Preferred alignment:  {} bytes", caps.preferred_alignment);
    println!("Cache line size:      {} bytes", caps.cache_line_size);
    println!();

    println!("Kernels usable on this host (best first):");
    for kernel in StepKernel::available() {
        println!("  {:<8} batch width {}", kernel.name(), kernel.batch_width());
    }
    println!();

    let kernel = select_step_kernel(&caps);
    println!("Active step kernel: {}", kernel);
    match kernel {
        StepKernel::Avx512 => println!("   - One 512-bit register per batch of 4 particles"),
        StepKernel::Avx2 => println!("   - Two particles per 256-bit register"),
        StepKernel::Sse2 => println!("   - One particle per 128-bit register"),
        StepKernel::Scalar => {
            println!("   - No vectorization");
            if !cfg!(feature = "simd") {
                println!("   - Built without the 'simd' feature");
            }
        }
    }
}
