/*
Copyright 2025 The gatewaylb-controller Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! HTTPRoute resolution, acceptance and programming (§4.4).

pub mod controller;
pub mod programmer;
pub mod resolver;

pub use controller::run;
pub use programmer::{
    accept_route, backend_ref_keys, deprovision_route, fail_resolved_refs, is_programming_required, program_route,
    resolve_backend_refs, set_programmed, ProgramRouteInput,
};
pub use resolver::{resolve_request, ResolvedRouteDetails};
